use std::num::NonZeroU32;

use moodfeed_core::{ProviderId, Symbol, TickersQuery, ValidationError};
use serde_json::{json, Value};

use crate::cli::{DividendsArgs, OverviewArgs, QuoteArgs, SearchArgs, TickersArgs};
use crate::error::CliError;

use super::{CommandResult, Context};

pub async fn quote(args: &QuoteArgs, context: &Context) -> Result<CommandResult, CliError> {
    let symbols = Symbol::parse_many(&args.symbols)?;
    let mut result = CommandResult::new(Some(ProviderId::Alphavantage));

    let mut quotes = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let outcome = context
            .clients
            .alphavantage
            .quote(symbol, context.options())
            .await;
        if let Some(data) = result.absorb(outcome) {
            quotes.push(data.get("Global Quote").cloned().unwrap_or(data));
        }
    }

    Ok(result.with_data(json!({ "quotes": quotes })))
}

pub async fn search(args: &SearchArgs, context: &Context) -> Result<CommandResult, CliError> {
    let keywords = args.keywords.trim();
    if keywords.is_empty() {
        return Err(ValidationError::EmptyKeywords.into());
    }

    let mut result = CommandResult::new(Some(ProviderId::Alphavantage));
    let outcome = context
        .clients
        .alphavantage
        .symbol_search(keywords, context.options())
        .await;
    let matches = result
        .absorb(outcome)
        .and_then(|data| data.get("bestMatches").cloned())
        .unwrap_or_else(|| json!([]));

    Ok(result.with_data(json!({ "matches": matches })))
}

pub async fn overview(args: &OverviewArgs, context: &Context) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let mut result = CommandResult::new(Some(ProviderId::Alphavantage));

    let outcome = context
        .clients
        .alphavantage
        .company_overview(&symbol, context.options())
        .await;
    let data = result.absorb(outcome).unwrap_or(Value::Null);

    Ok(result.with_data(json!({ "symbol": symbol, "overview": data })))
}

pub async fn dividends(args: &DividendsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let mut result = CommandResult::new(Some(ProviderId::Polygon));

    let outcome = context
        .clients
        .polygon
        .dividends(&symbol, context.options())
        .await;
    let data = result.absorb(outcome).map(results).unwrap_or_default();

    Ok(result.with_data(json!({ "symbol": symbol, "dividends": data })))
}

pub async fn tickers(args: &TickersArgs, context: &Context) -> Result<CommandResult, CliError> {
    let limit = NonZeroU32::new(args.limit).ok_or(ValidationError::ZeroLimit)?;
    let query = TickersQuery {
        market: args.market.trim().to_ascii_lowercase(),
        limit,
        ..TickersQuery::default()
    };
    let mut result = CommandResult::new(Some(ProviderId::Polygon));

    let outcome = context
        .clients
        .polygon
        .tickers(&query, context.options())
        .await;
    let data = result.absorb(outcome).map(results).unwrap_or_default();

    Ok(result.with_data(json!({ "tickers": data })))
}

/// Polygon wraps every listing in `{ status, count, results }`.
fn results(body: Value) -> Vec<Value> {
    match body.get("results") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}
