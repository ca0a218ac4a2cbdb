use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::ProviderHandle;
use crate::fallback::FallbackService;
use crate::http_client::{HttpAuth, HttpClient};
use crate::mock::{AssetKind, MockCatalog, SyntheticQuote};
use crate::provider::{FetchOptions, Fetched, ProviderCall, ProviderClient, ProviderError};
use crate::provider_policy::ProviderPolicy;
use crate::retry::{embedded_error, mentions_rate_limit, FetchError};
use crate::{join_symbols, Symbol, UtcDateTime, ValidationError};

/// Paging and sorting for the latest listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingsQuery {
    pub start: NonZeroU32,
    pub limit: NonZeroU32,
    pub convert: String,
    pub sort: String,
}

impl Default for ListingsQuery {
    fn default() -> Self {
        Self {
            start: NonZeroU32::MIN,
            limit: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            convert: String::from("USD"),
            sort: String::from("market_cap"),
        }
    }
}

/// Window over which trending coins are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrendingPeriod {
    OneHour,
    #[default]
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl TrendingPeriod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }
}

impl Display for TrendingPeriod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendingPeriod {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Self::OneHour),
            "24h" => Ok(Self::OneDay),
            "7d" => Ok(Self::SevenDays),
            "30d" => Ok(Self::ThirtyDays),
            other => Err(ValidationError::InvalidTimePeriod {
                value: other.to_owned(),
            }),
        }
    }
}

/// CoinMarketCap crypto quotes, listings, metadata and global metrics.
#[derive(Debug)]
pub struct CoinMarketCapClient {
    inner: ProviderClient,
}

impl CoinMarketCapClient {
    pub fn new(
        policy: ProviderPolicy,
        base_url: impl Into<String>,
        api_key: Option<String>,
        http: Arc<dyn HttpClient>,
        fallback: Arc<FallbackService>,
    ) -> Self {
        let auth = match api_key {
            Some(value) => HttpAuth::Header {
                name: String::from("X-CMC_PRO_API_KEY"),
                value,
            },
            None => HttpAuth::None,
        };
        Self {
            inner: ProviderClient::new(policy, base_url, auth, http, fallback)
                .with_inspector(inspect_payload),
        }
    }

    /// Latest quotes for `symbols`, keyed by symbol.
    pub async fn quotes(
        &self,
        symbols: &[Symbol],
        convert: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let wanted = symbols.to_vec();
        let currency = convert.to_owned();
        let call = ProviderCall::new(
            "/quotes",
            self.inner.policy().ttls.crypto_quotes,
            move |mocks| mock_quotes(&mocks.quotes(&wanted), &currency),
        )
        .with_query("symbol", join_symbols(symbols))
        .with_query("convert", convert)
        .with_options(options);

        self.inner.fetch(call).await
    }

    /// Latest quotes for CoinMarketCap ids, keyed by id.
    pub async fn quotes_by_id(
        &self,
        ids: &[NonZeroU32],
        convert: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let wanted = ids.to_vec();
        let currency = convert.to_owned();
        let call = ProviderCall::new(
            "/quotes",
            self.inner.policy().ttls.crypto_quotes,
            move |mocks| mock_quotes_by_id(mocks, &wanted, &currency),
        )
        .with_query("id", join_ids(ids))
        .with_query("convert", convert)
        .with_options(options);

        self.inner.fetch(call).await
    }

    /// Static coin metadata (name, slug, category, links), keyed by symbol.
    pub async fn metadata(
        &self,
        symbols: &[Symbol],
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let wanted = symbols.to_vec();
        let call = ProviderCall::new("/info", self.inner.policy().ttls.reference, move |mocks| {
            mock_metadata(mocks, &wanted)
        })
        .with_query("symbol", join_symbols(symbols))
        .with_options(options);

        self.inner.fetch(call).await
    }

    /// Active coins whose symbol matches `query`, via the id map.
    pub async fn search(
        &self,
        query: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let needle = query.trim().to_owned();
        let call = ProviderCall::new("/map", self.inner.policy().ttls.search, move |mocks| {
            mock_map(mocks, &needle)
        })
        .with_query("listing_status", "active")
        .with_query("symbol", query.trim())
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn trending(
        &self,
        limit: NonZeroU32,
        period: TrendingPeriod,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let take = limit.get();
        let call = ProviderCall::new(
            "/trending",
            self.inner.policy().ttls.crypto_quotes,
            move |mocks| mock_trending(mocks, take),
        )
        .with_query("limit", take)
        .with_query("time_period", period)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn listings(
        &self,
        query: &ListingsQuery,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let start = query.start.get();
        let limit = query.limit.get();
        let currency = query.convert.clone();
        let call = ProviderCall::new(
            "/listings",
            self.inner.policy().ttls.crypto_quotes,
            move |mocks| mock_listings(mocks, start, limit, &currency),
        )
        .with_query("start", start)
        .with_query("limit", limit)
        .with_query("convert", &query.convert)
        .with_query("sort", &query.sort)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn global_metrics(
        &self,
        convert: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let currency = convert.to_owned();
        let call = ProviderCall::new(
            "/global-metrics",
            self.inner.policy().ttls.global_metrics,
            move |mocks| mock_global_metrics(mocks, &currency),
        )
        .with_query("convert", convert)
        .with_options(options);

        self.inner.fetch(call).await
    }
}

impl ProviderHandle for CoinMarketCapClient {
    fn provider_client(&self) -> &ProviderClient {
        &self.inner
    }
}

/// A non-zero `status.error_code` is an upstream error even on HTTP 200.
fn inspect_payload(body: &Value) -> Option<FetchError> {
    let status = body.get("status");
    let code = status
        .and_then(|status| status.get("error_code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if code != 0 {
        let message = status
            .and_then(|status| status.get("error_message"))
            .and_then(Value::as_str)
            .unwrap_or("API request failed")
            .to_owned();
        let rate_limited = code == 1008 || code == 1011 || mentions_rate_limit(&message);
        return Some(FetchError::Upstream {
            message,
            rate_limited,
        });
    }

    embedded_error(body)
}

fn status_block() -> Value {
    json!({
        "timestamp": UtcDateTime::now(),
        "error_code": 0,
        "error_message": null,
        "elapsed": 0,
        "credit_count": 0,
        "notice": "mock data",
    })
}

fn crypto_entry(quote: &SyntheticQuote, rank: usize, convert: &str) -> Value {
    let mut converted = Map::new();
    converted.insert(
        convert.to_owned(),
        json!({
            "price": quote.price,
            "volume_24h": quote.volume,
            "percent_change_1h": (quote.change_percent / 24.0 * 100.0).round() / 100.0,
            "percent_change_24h": quote.change_percent,
            "percent_change_7d": (quote.change_percent * 1.7 * 100.0).round() / 100.0,
            "market_cap": quote.market_cap,
            "last_updated": quote.as_of,
        }),
    );
    let slug = quote.name.to_ascii_lowercase().replace(' ', "-");
    json!({
        "id": rank,
        "name": quote.name,
        "symbol": quote.symbol,
        "slug": slug,
        "cmc_rank": rank,
        "circulating_supply": (quote.market_cap / quote.price).round(),
        "last_updated": quote.as_of,
        "quote": Value::Object(converted),
    })
}

fn ranked_crypto(mocks: &MockCatalog) -> Vec<SyntheticQuote> {
    let mut quotes = mocks.quotes(&mocks.symbols(AssetKind::Crypto));
    quotes.sort_by(|left, right| right.market_cap.total_cmp(&left.market_cap));
    quotes
}

fn mock_quotes(quotes: &[SyntheticQuote], convert: &str) -> Value {
    let data: Map<String, Value> = quotes
        .iter()
        .enumerate()
        .map(|(index, quote)| {
            (
                quote.symbol.to_string(),
                crypto_entry(quote, index + 1, convert),
            )
        })
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn mock_listings(mocks: &MockCatalog, start: u32, limit: u32, convert: &str) -> Value {
    let skip = usize::try_from(start.saturating_sub(1)).unwrap_or(usize::MAX);
    let take = usize::try_from(limit).unwrap_or(usize::MAX);
    let data: Vec<Value> = ranked_crypto(mocks)
        .iter()
        .enumerate()
        .skip(skip)
        .take(take)
        .map(|(index, quote)| crypto_entry(quote, index + 1, convert))
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn join_ids(ids: &[NonZeroU32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Mock ids are market-cap ranks, matching the listings mock.
fn mock_quotes_by_id(mocks: &MockCatalog, ids: &[NonZeroU32], convert: &str) -> Value {
    let data: Map<String, Value> = ranked_crypto(mocks)
        .iter()
        .enumerate()
        .map(|(index, quote)| (index + 1, quote))
        .filter(|(rank, _)| ids.iter().any(|id| usize::try_from(id.get()).ok() == Some(*rank)))
        .map(|(rank, quote)| (rank.to_string(), crypto_entry(quote, rank, convert)))
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn mock_metadata(mocks: &MockCatalog, symbols: &[Symbol]) -> Value {
    let data: Map<String, Value> = ranked_crypto(mocks)
        .iter()
        .enumerate()
        .filter(|(_, quote)| symbols.contains(&quote.symbol))
        .map(|(index, quote)| {
            let slug = quote.name.to_ascii_lowercase().replace(' ', "-");
            (
                quote.symbol.to_string(),
                json!({
                    "id": index + 1,
                    "name": quote.name,
                    "symbol": quote.symbol,
                    "slug": slug,
                    "category": "coin",
                    "description": format!("{} ({}) mock metadata.", quote.name, quote.symbol),
                    "logo": null,
                    "urls": {"website": [], "technical_doc": []},
                }),
            )
        })
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn mock_map(mocks: &MockCatalog, query: &str) -> Value {
    let symbol = query.to_ascii_uppercase();
    let name = query.to_ascii_lowercase();
    let now = UtcDateTime::now();
    let data: Vec<Value> = ranked_crypto(mocks)
        .iter()
        .enumerate()
        .filter(|(_, quote)| {
            !query.is_empty()
                && (quote.symbol.as_str().starts_with(&symbol)
                    || quote.name.to_ascii_lowercase().contains(&name))
        })
        .map(|(index, quote)| {
            json!({
                "id": index + 1,
                "name": quote.name,
                "symbol": quote.symbol,
                "slug": quote.name.to_ascii_lowercase().replace(' ', "-"),
                "rank": index + 1,
                "is_active": 1,
                "first_historical_data": "2013-04-28T18:47:21.000Z",
                "last_historical_data": now,
            })
        })
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn mock_trending(mocks: &MockCatalog, limit: u32) -> Value {
    let mut ranked: Vec<(usize, SyntheticQuote)> =
        ranked_crypto(mocks).into_iter().enumerate().collect();
    ranked.sort_by(|(_, left), (_, right)| right.change_percent.total_cmp(&left.change_percent));
    let take = usize::try_from(limit).unwrap_or(usize::MAX);
    let data: Vec<Value> = ranked
        .iter()
        .take(take)
        .map(|(index, quote)| crypto_entry(quote, index + 1, "USD"))
        .collect();
    json!({ "status": status_block(), "data": data })
}

fn mock_global_metrics(mocks: &MockCatalog, convert: &str) -> Value {
    let ranked = ranked_crypto(mocks);
    let total_market_cap: f64 = ranked.iter().map(|quote| quote.market_cap).sum();
    let total_volume: u64 = ranked.iter().map(|quote| quote.volume).sum();
    let dominance = |symbol: &str| {
        ranked
            .iter()
            .find(|quote| quote.symbol.as_str() == symbol)
            .filter(|_| total_market_cap > 0.0)
            .map(|quote| (quote.market_cap / total_market_cap * 10_000.0).round() / 100.0)
            .unwrap_or(0.0)
    };

    let mut converted = Map::new();
    converted.insert(
        convert.to_owned(),
        json!({
            "total_market_cap": total_market_cap,
            "total_volume_24h": total_volume,
            "last_updated": UtcDateTime::now(),
        }),
    );

    json!({
        "status": status_block(),
        "data": {
            "active_cryptocurrencies": ranked.len(),
            "total_cryptocurrencies": ranked.len(),
            "btc_dominance": dominance("BTC"),
            "eth_dominance": dominance("ETH"),
            "quote": Value::Object(converted),
            "last_updated": UtcDateTime::now(),
        }
    })
}
