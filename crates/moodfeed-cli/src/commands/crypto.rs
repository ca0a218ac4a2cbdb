use std::num::NonZeroU32;

use moodfeed_core::{ListingsQuery, ProviderId, Symbol, TrendingPeriod, ValidationError};
use serde_json::{json, Value};

use crate::cli::{CoinInfoArgs, CoinSearchArgs, CryptoArgs, ListingsArgs, MetricsArgs, TrendingArgs};
use crate::error::CliError;

use super::{CommandResult, Context};

pub async fn quotes(args: &CryptoArgs, context: &Context) -> Result<CommandResult, CliError> {
    let convert = currency(&args.convert);
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));
    let client = &context.clients.coinmarketcap;

    let outcome = if args.ids.is_empty() {
        let symbols = Symbol::parse_many(&args.symbols)?;
        client.quotes(&symbols, &convert, context.options()).await
    } else {
        let ids = ids(&args.ids)?;
        client.quotes_by_id(&ids, &convert, context.options()).await
    };
    let data = result.absorb(outcome).map(payload).unwrap_or_else(|| json!({}));

    Ok(result.with_data(json!({ "convert": convert, "quotes": data })))
}

pub async fn listings(args: &ListingsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let query = ListingsQuery {
        start: NonZeroU32::new(args.start).ok_or(ValidationError::ZeroLimit)?,
        limit: NonZeroU32::new(args.limit).ok_or(ValidationError::ZeroLimit)?,
        convert: currency(&args.convert),
        ..ListingsQuery::default()
    };
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));

    let outcome = context
        .clients
        .coinmarketcap
        .listings(&query, context.options())
        .await;
    let data = result.absorb(outcome).map(payload).unwrap_or_else(|| json!([]));

    Ok(result.with_data(json!({ "convert": query.convert, "listings": data })))
}

pub async fn trending(args: &TrendingArgs, context: &Context) -> Result<CommandResult, CliError> {
    let limit = NonZeroU32::new(args.limit).ok_or(ValidationError::ZeroLimit)?;
    let period: TrendingPeriod = args.period.parse()?;
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));

    let outcome = context
        .clients
        .coinmarketcap
        .trending(limit, period, context.options())
        .await;
    let data = result.absorb(outcome).map(payload).unwrap_or_else(|| json!([]));

    Ok(result.with_data(json!({ "period": period.as_str(), "trending": data })))
}

pub async fn info(args: &CoinInfoArgs, context: &Context) -> Result<CommandResult, CliError> {
    let symbols = Symbol::parse_many(&args.symbols)?;
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));

    let outcome = context
        .clients
        .coinmarketcap
        .metadata(&symbols, context.options())
        .await;
    let data = result.absorb(outcome).map(payload).unwrap_or_else(|| json!({}));

    Ok(result.with_data(json!({ "coins": data })))
}

pub async fn search(args: &CoinSearchArgs, context: &Context) -> Result<CommandResult, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(ValidationError::EmptyKeywords.into());
    }
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));

    let outcome = context
        .clients
        .coinmarketcap
        .search(query, context.options())
        .await;
    let data = result.absorb(outcome).map(payload).unwrap_or_else(|| json!([]));

    Ok(result.with_data(json!({ "query": query, "matches": data })))
}

pub async fn metrics(args: &MetricsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let convert = currency(&args.convert);
    let mut result = CommandResult::new(Some(ProviderId::Coinmarketcap));

    let outcome = context
        .clients
        .coinmarketcap
        .global_metrics(&convert, context.options())
        .await;
    let data = result.absorb(outcome).map(payload).unwrap_or(Value::Null);

    Ok(result.with_data(json!({ "convert": convert, "metrics": data })))
}

/// CoinMarketCap ids start at 1.
fn ids(raw: &[u32]) -> Result<Vec<NonZeroU32>, ValidationError> {
    raw.iter()
        .map(|&id| NonZeroU32::new(id).ok_or(ValidationError::ZeroLimit))
        .collect()
}

fn currency(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// CoinMarketCap puts the useful part of every answer under `data`.
fn payload(body: Value) -> Value {
    match body {
        Value::Object(mut fields) => fields.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_strips_status_block() {
        let body = json!({"status": {"error_code": 0}, "data": {"BTC": {"symbol": "BTC"}}});
        assert_eq!(payload(body), json!({"BTC": {"symbol": "BTC"}}));
    }

    #[test]
    fn ids_reject_zero() {
        assert_eq!(ids(&[1, 1027]).map(|ids| ids.len()), Ok(2));
        assert_eq!(ids(&[0]), Err(ValidationError::ZeroLimit));
    }

    #[test]
    fn currency_is_normalized() {
        assert_eq!(currency(" eur "), "EUR");
    }
}
