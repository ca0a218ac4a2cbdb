use std::sync::Arc;
use std::time::{Duration, Instant};

use moodfeed_core::{CancelReason, FetchOptions, MarketClients, PollingTask, ProviderId, Symbol};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::output::{self, Envelope};

use super::{CommandResult, Context};

/// Polls quotes every `--every-secs` and prints one compact envelope per run.
pub async fn run(args: &WatchArgs, context: &Context) -> Result<(), CliError> {
    let symbols = Arc::new(Symbol::parse_many(&args.symbols)?);
    let period = Duration::from_secs(args.every_secs.max(1));
    let crypto = args.crypto;
    let (sender, mut receiver) = mpsc::channel::<Envelope>(4);

    let clients = Arc::clone(&context.clients);
    let options = context.options();
    let job_symbols = Arc::clone(&symbols);
    let handle = PollingTask::spawn(period, move || {
        let clients = Arc::clone(&clients);
        let symbols = Arc::clone(&job_symbols);
        let options = options.clone();
        let sender = sender.clone();
        async move {
            let envelope = poll_once(&clients, &symbols, crypto, options).await;
            let _ = sender.send(envelope).await;
        }
    });

    info!(symbols = symbols.len(), every_secs = period.as_secs(), "watch started");
    let mut runs = 0_u32;
    loop {
        tokio::select! {
            envelope = receiver.recv() => {
                let Some(envelope) = envelope else { break };
                output::render(&envelope, false)?;
                runs = runs.saturating_add(1);
                if args.count.is_some_and(|count| runs >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                context.cancel.cancel_with(CancelReason::External);
                break;
            }
        }
    }

    handle.shutdown().await;
    info!(runs, "watch stopped");
    Ok(())
}

async fn poll_once(
    clients: &MarketClients,
    symbols: &[Symbol],
    crypto: bool,
    options: FetchOptions,
) -> Envelope {
    let started = Instant::now();

    if crypto {
        let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));
        let outcome = clients.coinmarketcap.quotes(symbols, "USD", options).await;
        let data = result
            .absorb(outcome)
            .and_then(|body| body.get("data").cloned())
            .unwrap_or_else(|| json!({}));
        return result.with_data(json!({ "quotes": data })).into_envelope(started);
    }

    let mut result = CommandResult::new(Some(ProviderId::Alphavantage));
    let mut quotes = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let outcome = clients.alphavantage.quote(symbol, options.clone()).await;
        if let Some(data) = result.absorb(outcome) {
            quotes.push(data.get("Global Quote").cloned().unwrap_or(data));
        }
    }
    result
        .with_data(json!({ "quotes": quotes }))
        .into_envelope(started)
}
