mod crypto;
mod series;
mod stocks;
mod status;
mod watch;

use std::sync::Arc;
use std::time::Instant;

use moodfeed_core::{
    CacheMode, CancelReason, CancelSignal, FetchOptions, Fetched, MarketClients, ProviderError,
    ProviderId, ResilienceConfig,
};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::Metadata;
use crate::output::{Envelope, EnvelopeError};

/// Data and bookkeeping collected while a command runs.
pub struct CommandResult {
    pub provider: Option<ProviderId>,
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub cache_hit: bool,
    pub degraded: bool,
}

impl CommandResult {
    pub fn new(provider: Option<ProviderId>) -> Self {
        Self {
            provider,
            data: Value::Null,
            warnings: Vec::new(),
            errors: Vec::new(),
            cache_hit: false,
            degraded: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Folds one provider outcome into the result, returning its data if any.
    pub fn absorb(&mut self, outcome: Result<Fetched<Value>, ProviderError>) -> Option<Value> {
        match outcome {
            Ok(fetched) => {
                self.cache_hit |= fetched.is_cached();
                self.degraded |= fetched.is_degraded();
                if let Some(advisory) = fetched.advisory() {
                    if !self.warnings.iter().any(|warning| warning == advisory) {
                        self.warnings.push(advisory.to_owned());
                    }
                }
                Some(fetched.into_data())
            }
            Err(error) => {
                debug!(error = %error, "command step failed");
                self.errors.push(EnvelopeError::from(&error));
                None
            }
        }
    }

    pub fn into_envelope(self, started: Instant) -> Envelope {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut meta = Metadata::new(self.provider, latency_ms);
        meta.cache_hit = self.cache_hit;
        meta.degraded = self.degraded;
        for warning in self.warnings {
            meta.push_warning(warning);
        }
        Envelope {
            meta,
            data: self.data,
            errors: self.errors,
        }
    }
}

/// Clients plus the per-invocation fetch options.
pub struct Context {
    pub clients: Arc<MarketClients>,
    pub cache_mode: CacheMode,
    pub cancel: CancelSignal,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ResilienceConfig::load(cli.config.as_deref())?;
        if cli.timeout_ms.is_some() {
            config.retry.timeout_ms = cli.timeout_ms;
        }
        if cli.max_retries.is_some() {
            config.retry.max_retries = cli.max_retries;
        }

        let clients = MarketClients::builder()
            .with_config(config)
            .offline(cli.offline)
            .build()?;
        let clients = Arc::new(clients);

        Ok(Self {
            clients,
            cache_mode: if cli.no_cache {
                CacheMode::Bypass
            } else {
                CacheMode::Use
            },
            cancel: CancelSignal::new(),
        })
    }

    pub fn options(&self) -> FetchOptions {
        FetchOptions::default()
            .with_cache_mode(self.cache_mode)
            .with_cancel(self.cancel.clone())
    }
}

/// Runs one command. `watch` prints its own lines and yields no envelope.
pub async fn run(cli: &Cli, context: &Context) -> Result<Option<Envelope>, CliError> {
    if let Command::Watch(args) = &cli.command {
        watch::run(args, context).await?;
        return Ok(None);
    }

    let started = Instant::now();

    // Ctrl-C cancels in-flight requests so the envelope still reports what happened.
    let cancel = context.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel_with(CancelReason::External);
        }
    });

    let result = match &cli.command {
        Command::Quote(args) => stocks::quote(args, context).await,
        Command::Search(args) => stocks::search(args, context).await,
        Command::Overview(args) => stocks::overview(args, context).await,
        Command::Dividends(args) => stocks::dividends(args, context).await,
        Command::Tickers(args) => stocks::tickers(args, context).await,
        Command::Series(args) => series::run(args, context).await,
        Command::Crypto(args) => crypto::quotes(args, context).await,
        Command::Listings(args) => crypto::listings(args, context).await,
        Command::Trending(args) => crypto::trending(args, context).await,
        Command::CoinInfo(args) => crypto::info(args, context).await,
        Command::CoinSearch(args) => crypto::search(args, context).await,
        Command::Metrics(args) => crypto::metrics(args, context).await,
        Command::Status(args) => Ok(status::run(args, context)),
        Command::Watch(_) => Ok(CommandResult::new(None)),
    };
    interrupt.abort();

    Ok(Some(result?.into_envelope(started)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use moodfeed_core::{DataOrigin, Degraded, FetchError, ProviderHandle, DEGRADED_ADVISORY};
    use serde_json::json;

    use super::*;

    #[test]
    fn absorb_tracks_cache_and_degradation() {
        let mut result = CommandResult::new(Some(ProviderId::Polygon));

        let live = result.absorb(Ok(Fetched::Live(json!(1))));
        let degraded = result.absorb(Ok(Fetched::Degraded(Degraded {
            data: json!(2),
            origin: DataOrigin::Mock,
            advisory: String::from(DEGRADED_ADVISORY),
        })));
        let failed = result.absorb(Err(ProviderError::new(
            ProviderId::Polygon,
            FetchError::CircuitOpen {
                retry_in: Duration::from_secs(30),
            },
        )));

        assert_eq!(live, Some(json!(1)));
        assert_eq!(degraded, Some(json!(2)));
        assert_eq!(failed, None);
        assert!(result.degraded);
        assert!(!result.cache_hit);
        assert_eq!(result.warnings, vec![String::from(DEGRADED_ADVISORY)]);
        assert_eq!(result.errors[0].code, "PolygonApiError");
    }

    fn parse(args: &[&str]) -> Cli {
        use clap::Parser;

        Cli::try_parse_from(args).expect("valid arguments")
    }

    #[test]
    fn context_reads_config_file_and_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut file,
            br#"{"retry": {"max_retries": 1, "timeout_ms": 2500}, "fallback": {"failure_threshold": 5}}"#,
        )
        .expect("write config");
        let path = file.path().to_string_lossy().into_owned();

        let cli = parse(&["moodfeed", "--config", &path, "--timeout-ms", "900", "--offline", "--no-cache", "status"]);
        let context = Context::from_cli(&cli).expect("config loads");

        let policy = context.clients.polygon.provider_client().policy();
        assert_eq!(policy.retry.max_retries, 1);
        assert_eq!(policy.retry.timeout, Duration::from_millis(900));
        assert_eq!(context.clients.fallback.config().failure_threshold, 5);
        assert!(context.clients.fallback.is_api_disabled());
        assert_eq!(context.cache_mode, CacheMode::Bypass);
    }

    #[test]
    fn malformed_config_file_maps_to_config_exit_code() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, br#"{"retry": {"max_retries": "many"}}"#)
            .expect("write config");
        let path = file.path().to_string_lossy().into_owned();

        let cli = parse(&["moodfeed", "--config", &path, "status"]);
        let Err(error) = Context::from_cli(&cli) else {
            panic!("malformed config must be rejected");
        };
        assert_eq!(error.exit_code(), 7);
    }

    #[test]
    fn crypto_accepts_symbols_or_ids_but_not_both() {
        use clap::Parser;

        let by_id = parse(&["moodfeed", "crypto", "--ids", "1,1027"]);
        let Command::Crypto(args) = by_id.command else {
            panic!("crypto command");
        };
        assert_eq!(args.ids, vec![1, 1027]);
        assert!(args.symbols.is_empty());

        assert!(Cli::try_parse_from(["moodfeed", "crypto"]).is_err());
        assert!(Cli::try_parse_from(["moodfeed", "crypto", "BTC", "--ids", "1"]).is_err());
    }

    #[test]
    fn envelope_copies_flags_into_meta() {
        let mut result = CommandResult::new(None);
        result.absorb(Ok(Fetched::Cached(json!({"cached": true}))));

        let envelope = result.into_envelope(Instant::now());

        assert!(envelope.meta.cache_hit);
        assert!(!envelope.meta.degraded);
        assert!(envelope.errors.is_empty());
    }
}
