use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::ProviderHandle;
use crate::fallback::FallbackService;
use crate::http_client::{HttpAuth, HttpClient};
use crate::mock::{AssetKind, MockCatalog};
use crate::provider::{FetchOptions, Fetched, ProviderCall, ProviderClient, ProviderError};
use crate::provider_policy::ProviderPolicy;
use crate::{Symbol, UtcDateTime};

/// Parameters of the reference tickers listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickersQuery {
    pub market: String,
    pub active: bool,
    pub order: String,
    pub limit: NonZeroU32,
    pub sort: String,
}

impl Default for TickersQuery {
    fn default() -> Self {
        Self {
            market: String::from("stocks"),
            active: true,
            order: String::from("asc"),
            limit: NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN),
            sort: String::from("ticker"),
        }
    }
}

/// Parameters of the NBBO quotes listing for one ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotesQuery {
    pub order: String,
    pub limit: NonZeroU32,
    pub sort: String,
}

impl Default for QuotesQuery {
    fn default() -> Self {
        Self {
            order: String::from("asc"),
            limit: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            sort: String::from("timestamp"),
        }
    }
}

/// Polygon.io reference data, dividends and quotes.
#[derive(Debug)]
pub struct PolygonClient {
    inner: ProviderClient,
}

impl PolygonClient {
    pub fn new(
        policy: ProviderPolicy,
        base_url: impl Into<String>,
        api_key: Option<String>,
        http: Arc<dyn HttpClient>,
        fallback: Arc<FallbackService>,
    ) -> Self {
        let auth = match api_key {
            Some(value) => HttpAuth::QueryParam {
                name: String::from("apiKey"),
                value,
            },
            None => HttpAuth::None,
        };
        Self {
            inner: ProviderClient::new(policy, base_url, auth, http, fallback),
        }
    }

    pub async fn tickers(
        &self,
        query: &TickersQuery,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let limit = query.limit.get();
        let call = ProviderCall::new("/tickers", self.inner.policy().ttls.tickers, move |mocks| {
            mock_tickers(mocks, limit)
        })
        .with_query("market", &query.market)
        .with_query("active", query.active)
        .with_query("order", &query.order)
        .with_query("limit", limit)
        .with_query("sort", &query.sort)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn dividends(
        &self,
        symbol: &Symbol,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let call = ProviderCall::new(
            "/dividends",
            self.inner.policy().ttls.dividends,
            move |mocks| mock_dividends(mocks, &ticker),
        )
        .with_query("ticker", symbol)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn quotes(
        &self,
        symbol: &Symbol,
        query: &QuotesQuery,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let limit = query.limit.get();
        let call = ProviderCall::new(
            format!("/quotes/{}", urlencoding::encode(symbol.as_str())),
            self.inner.policy().ttls.quotes,
            move |mocks| mock_quotes(mocks, &ticker, limit),
        )
        .with_query("order", &query.order)
        .with_query("limit", limit)
        .with_query("sort", &query.sort)
        .with_options(options);

        self.inner.fetch(call).await
    }
}

impl ProviderHandle for PolygonClient {
    fn provider_client(&self) -> &ProviderClient {
        &self.inner
    }
}

fn envelope(results: Vec<Value>) -> Value {
    json!({
        "status": "OK",
        "request_id": "mock",
        "count": results.len(),
        "results": results,
    })
}

fn mock_tickers(mocks: &MockCatalog, limit: u32) -> Value {
    let updated = UtcDateTime::now();
    let results = mocks
        .symbols(AssetKind::Stock)
        .iter()
        .filter_map(|symbol| mocks.seed(symbol))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .map(|seed| {
            json!({
                "ticker": seed.symbol,
                "name": seed.name,
                "market": "stocks",
                "locale": "us",
                "primary_exchange": "XNAS",
                "type": "CS",
                "active": true,
                "currency_name": "usd",
                "last_updated_utc": updated,
            })
        })
        .collect();
    envelope(results)
}

fn mock_dividends(mocks: &MockCatalog, symbol: &Symbol) -> Value {
    let Some(quote) = mocks.quote(symbol) else {
        return envelope(Vec::new());
    };
    let quarter = Duration::from_secs(91 * 86_400);
    let cash_amount = (quote.previous_close * 0.0015 * 100.0).round() / 100.0;

    let results = (0..4_u32)
        .map(|index| {
            let ex_date = UtcDateTime::ago(quarter.saturating_mul(index));
            let record_date = UtcDateTime::ago(
                quarter
                    .saturating_mul(index)
                    .saturating_sub(Duration::from_secs(86_400)),
            );
            let pay_date = UtcDateTime::ago(
                quarter
                    .saturating_mul(index)
                    .saturating_sub(Duration::from_secs(14 * 86_400)),
            );
            json!({
                "ticker": symbol,
                "cash_amount": cash_amount,
                "currency": "USD",
                "declaration_date": UtcDateTime::ago(quarter.saturating_mul(index) + Duration::from_secs(30 * 86_400)).date_string(),
                "dividend_type": "CD",
                "ex_dividend_date": ex_date.date_string(),
                "frequency": 4,
                "pay_date": pay_date.date_string(),
                "record_date": record_date.date_string(),
            })
        })
        .collect();
    envelope(results)
}

fn mock_quotes(mocks: &MockCatalog, symbol: &Symbol, limit: u32) -> Value {
    let results = (0..limit.min(50))
        .filter_map(|index| {
            let quote = mocks.quote(symbol)?;
            let nanos = UtcDateTime::ago(Duration::from_secs(u64::from(index)))
                .unix_millis()
                .saturating_mul(1_000_000);
            Some(json!({
                "ask_price": (quote.price * 1.0005 * 100.0).round() / 100.0,
                "ask_size": 1 + fastrand::u32(0..20),
                "bid_price": (quote.price * 0.9995 * 100.0).round() / 100.0,
                "bid_size": 1 + fastrand::u32(0..20),
                "ask_exchange": 12,
                "bid_exchange": 11,
                "sequence_number": u64::from(index) + 1,
                "participant_timestamp": nanos,
                "sip_timestamp": nanos,
            }))
        })
        .collect();
    envelope(results)
}
