use moodfeed_core::{IntradayInterval, OutputSize, ProviderId, Symbol};
use serde_json::{json, Map, Value};

use crate::cli::SeriesArgs;
use crate::error::CliError;

use super::{CommandResult, Context};

pub async fn run(args: &SeriesArgs, context: &Context) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let output_size: OutputSize = args.output_size.parse()?;
    let interval = args
        .interval
        .as_deref()
        .map(str::parse::<IntradayInterval>)
        .transpose()?;

    let client = &context.clients.alphavantage;
    let outcome = match interval {
        Some(interval) => {
            client
                .intraday(&symbol, interval, output_size, context.options())
                .await
        }
        None => client.daily(&symbol, output_size, context.options()).await,
    };

    let mut result = CommandResult::new(Some(ProviderId::Alphavantage));
    let bars = result.absorb(outcome).map(bars).unwrap_or_default();
    let interval = interval.map_or("daily", |interval| interval.as_str());

    Ok(result.with_data(json!({
        "symbol": symbol,
        "interval": interval,
        "bars": bars,
    })))
}

/// Flattens Alpha Vantage's `"Time Series (..)"` map into time-ordered bars.
fn bars(body: Value) -> Vec<Value> {
    let Some(series) = body
        .as_object()
        .and_then(|fields| {
            fields
                .iter()
                .find(|(key, _)| key.starts_with("Time Series"))
                .map(|(_, value)| value)
        })
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    let mut bars: Vec<Value> = series
        .iter()
        .map(|(ts, point)| {
            let mut bar = Map::new();
            bar.insert(String::from("ts"), Value::String(ts.clone()));
            if let Some(fields) = point.as_object() {
                for (key, value) in fields {
                    // "1. open" -> "open"
                    let name = key.split_once(". ").map_or(key.as_str(), |(_, name)| name);
                    bar.insert(name.to_owned(), number(value));
                }
            }
            Value::Object(bar)
        })
        .collect();
    bars.sort_by(|left, right| left["ts"].as_str().cmp(&right["ts"].as_str()));
    bars
}

fn number(value: &Value) -> Value {
    value
        .as_str()
        .and_then(|raw| raw.parse::<f64>().ok())
        .map_or_else(|| value.clone(), |parsed| json!(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_are_flattened_and_sorted() {
        let body = json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (5min)": {
                "2025-03-01 09:35:00": {"1. open": "101.5", "5. volume": "1200"},
                "2025-03-01 09:30:00": {"1. open": "100.0", "5. volume": "900"}
            }
        });

        let bars = bars(body);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0]["ts"], json!("2025-03-01 09:30:00"));
        assert_eq!(bars[0]["open"], json!(100.0));
        assert_eq!(bars[1]["volume"], json!(1200.0));
    }

    #[test]
    fn missing_series_yields_no_bars() {
        assert!(bars(json!({"Note": "slow down"})).is_empty());
    }
}
