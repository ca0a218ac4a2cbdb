use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::ProviderHandle;
use crate::fallback::FallbackService;
use crate::http_client::{HttpAuth, HttpClient};
use crate::mock::{AssetKind, MockCatalog, SyntheticBar};
use crate::provider::{FetchOptions, Fetched, ProviderCall, ProviderClient, ProviderError};
use crate::provider_policy::ProviderPolicy;
use crate::retry::{embedded_error, FetchError};
use crate::{Symbol, UtcDateTime, ValidationError};

const QUERY_ENDPOINT: &str = "/query";

/// Bar size of the intraday series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntradayInterval {
    OneMinute,
    #[default]
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl IntradayInterval {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::SixtyMinutes => "60min",
        }
    }

    pub const fn step(self) -> Duration {
        let minutes = match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::SixtyMinutes => 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl Display for IntradayInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntradayInterval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1min" => Ok(Self::OneMinute),
            "5min" => Ok(Self::FiveMinutes),
            "15min" => Ok(Self::FifteenMinutes),
            "30min" => Ok(Self::ThirtyMinutes),
            "60min" => Ok(Self::SixtyMinutes),
            other => Err(ValidationError::InvalidInterval {
                value: other.to_owned(),
            }),
        }
    }
}

/// `compact` returns the latest 100 points, `full` the whole history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputSize {
    #[default]
    Compact,
    Full,
}

impl OutputSize {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Full => "full",
        }
    }

    const fn mock_points(self) -> usize {
        match self {
            Self::Compact => 100,
            Self::Full => 250,
        }
    }
}

impl Display for OutputSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputSize {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "full" => Ok(Self::Full),
            other => Err(ValidationError::InvalidOutputSize {
                value: other.to_owned(),
            }),
        }
    }
}

/// Alpha Vantage quotes, time series and symbol search.
#[derive(Debug)]
pub struct AlphaVantageClient {
    inner: ProviderClient,
}

impl AlphaVantageClient {
    pub fn new(
        policy: ProviderPolicy,
        base_url: impl Into<String>,
        api_key: Option<String>,
        http: Arc<dyn HttpClient>,
        fallback: Arc<FallbackService>,
    ) -> Self {
        let auth = HttpAuth::QueryParam {
            name: String::from("apikey"),
            value: api_key.unwrap_or_else(|| String::from("demo")),
        };
        Self {
            inner: ProviderClient::new(policy, base_url, auth, http, fallback)
                .with_inspector(inspect_payload),
        }
    }

    pub async fn quote(
        &self,
        symbol: &Symbol,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let call = ProviderCall::new(QUERY_ENDPOINT, self.inner.policy().ttls.quotes, move |mocks| {
            mock_global_quote(mocks, &ticker)
        })
        .with_query("function", "GLOBAL_QUOTE")
        .with_query("symbol", symbol)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn intraday(
        &self,
        symbol: &Symbol,
        interval: IntradayInterval,
        output_size: OutputSize,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let call = ProviderCall::new(
            QUERY_ENDPOINT,
            self.inner.policy().ttls.time_series,
            move |mocks| {
                let bars = mocks.series(&ticker, output_size.mock_points(), interval.step());
                mock_series(
                    &ticker,
                    &bars,
                    &format!("Time Series ({interval})"),
                    "Intraday (with splits and dividend adjustments) Prices and Volumes",
                    Some(interval),
                    output_size,
                )
            },
        )
        .with_query("function", "TIME_SERIES_INTRADAY")
        .with_query("symbol", symbol)
        .with_query("interval", interval)
        .with_query("outputsize", output_size)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn daily(
        &self,
        symbol: &Symbol,
        output_size: OutputSize,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let call = ProviderCall::new(
            QUERY_ENDPOINT,
            self.inner.policy().ttls.time_series,
            move |mocks| {
                let bars = mocks.series(
                    &ticker,
                    output_size.mock_points(),
                    Duration::from_secs(86_400),
                );
                mock_series(
                    &ticker,
                    &bars,
                    "Time Series (Daily)",
                    "Daily Prices (open, high, low, close) and Volumes",
                    None,
                    output_size,
                )
            },
        )
        .with_query("function", "TIME_SERIES_DAILY")
        .with_query("symbol", symbol)
        .with_query("outputsize", output_size)
        .with_options(options);

        self.inner.fetch(call).await
    }

    /// Fundamentals and company profile (`OVERVIEW`).
    pub async fn company_overview(
        &self,
        symbol: &Symbol,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let ticker = symbol.clone();
        let call = ProviderCall::new(
            QUERY_ENDPOINT,
            self.inner.policy().ttls.reference,
            move |mocks| mock_overview(mocks, &ticker),
        )
        .with_query("function", "OVERVIEW")
        .with_query("symbol", symbol)
        .with_options(options);

        self.inner.fetch(call).await
    }

    pub async fn symbol_search(
        &self,
        keywords: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Value>, ProviderError> {
        let needle = keywords.trim().to_owned();
        let call = ProviderCall::new(QUERY_ENDPOINT, self.inner.policy().ttls.search, move |mocks| {
            mock_search(mocks, &needle)
        })
        .with_query("function", "SYMBOL_SEARCH")
        .with_query("keywords", keywords.trim())
        .with_options(options);

        self.inner.fetch(call).await
    }
}

impl ProviderHandle for AlphaVantageClient {
    fn provider_client(&self) -> &ProviderClient {
        &self.inner
    }
}

/// Alpha Vantage answers 200 for everything; errors and throttling notices live in the body.
fn inspect_payload(body: &Value) -> Option<FetchError> {
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Some(FetchError::Upstream {
            message: message.to_owned(),
            rate_limited: false,
        });
    }

    for notice in ["Note", "Information"] {
        if let Some(message) = body.get(notice).and_then(Value::as_str) {
            return Some(FetchError::Upstream {
                message: message.to_owned(),
                rate_limited: true,
            });
        }
    }

    embedded_error(body)
}

fn price(value: f64) -> String {
    if value < 1.0 {
        format!("{value:.6}")
    } else {
        format!("{value:.4}")
    }
}

fn mock_global_quote(mocks: &MockCatalog, symbol: &Symbol) -> Value {
    let Some(quote) = mocks.quote(symbol) else {
        return json!({ "Global Quote": {} });
    };
    json!({
        "Global Quote": {
            "01. symbol": quote.symbol,
            "02. open": price(quote.open),
            "03. high": price(quote.high),
            "04. low": price(quote.low),
            "05. price": price(quote.price),
            "06. volume": quote.volume.to_string(),
            "07. latest trading day": quote.as_of.date_string(),
            "08. previous close": price(quote.previous_close),
            "09. change": price(quote.change),
            "10. change percent": format!("{:.4}%", quote.change_percent),
        }
    })
}

fn mock_series(
    symbol: &Symbol,
    bars: &[SyntheticBar],
    series_key: &str,
    information: &str,
    interval: Option<IntradayInterval>,
    output_size: OutputSize,
) -> Value {
    if bars.is_empty() {
        return json!({
            "Error Message": format!("Invalid API call. No data for symbol {symbol}."),
        });
    }

    let stamp = |bar: &SyntheticBar| match interval {
        Some(_) => bar.ts.datetime_string(),
        None => bar.ts.date_string(),
    };

    let mut points = Map::new();
    for bar in bars.iter().rev() {
        points.insert(
            stamp(bar),
            json!({
                "1. open": price(bar.open),
                "2. high": price(bar.high),
                "3. low": price(bar.low),
                "4. close": price(bar.close),
                "5. volume": bar.volume.to_string(),
            }),
        );
    }

    let last_refreshed = bars.last().map(stamp).unwrap_or_default();
    let mut meta = Map::new();
    meta.insert("1. Information".into(), json!(information));
    meta.insert("2. Symbol".into(), json!(symbol));
    meta.insert("3. Last Refreshed".into(), json!(last_refreshed));
    match interval {
        Some(interval) => {
            meta.insert("4. Interval".into(), json!(interval.as_str()));
            meta.insert("5. Output Size".into(), json!(output_size.as_str()));
            meta.insert("6. Time Zone".into(), json!("UTC"));
        }
        None => {
            meta.insert("4. Output Size".into(), json!(output_size.as_str()));
            meta.insert("5. Time Zone".into(), json!("UTC"));
        }
    }

    let mut body = Map::new();
    body.insert("Meta Data".into(), Value::Object(meta));
    body.insert(series_key.to_owned(), Value::Object(points));
    Value::Object(body)
}

/// Unknown symbols get `{}`, as the live endpoint answers.
fn mock_overview(mocks: &MockCatalog, symbol: &Symbol) -> Value {
    let Some(quote) = mocks.quote(symbol) else {
        return json!({});
    };
    let asset_type = match quote.kind {
        AssetKind::Stock => "Common Stock",
        AssetKind::Crypto => "Digital Currency",
    };
    let shares = if quote.price > 0.0 {
        (quote.market_cap / quote.price).round()
    } else {
        0.0
    };
    json!({
        "Symbol": quote.symbol,
        "AssetType": asset_type,
        "Name": quote.name,
        "Description": format!("{} mock company profile.", quote.name),
        "Exchange": "NASDAQ",
        "Currency": "USD",
        "Country": "USA",
        "MarketCapitalization": format!("{:.0}", quote.market_cap),
        "SharesOutstanding": format!("{shares:.0}"),
        "52WeekHigh": price(quote.high * 1.2),
        "52WeekLow": price(quote.low * 0.8),
        "LatestQuarter": quote.as_of.date_string(),
    })
}

fn mock_search(mocks: &MockCatalog, keywords: &str) -> Value {
    let needle = keywords.to_ascii_lowercase();
    let matches: Vec<Value> = [AssetKind::Stock, AssetKind::Crypto]
        .into_iter()
        .flat_map(|kind| mocks.symbols(kind))
        .filter_map(|symbol| mocks.seed(&symbol).cloned())
        .filter(|seed| {
            seed.symbol.as_str().to_ascii_lowercase().contains(&needle)
                || seed.name.to_ascii_lowercase().contains(&needle)
        })
        .map(|seed| {
            let score = if seed.symbol.as_str().eq_ignore_ascii_case(keywords) {
                "1.0000"
            } else {
                "0.5000"
            };
            let kind = match seed.kind {
                AssetKind::Stock => "Equity",
                AssetKind::Crypto => "Digital Currency",
            };
            json!({
                "1. symbol": seed.symbol,
                "2. name": seed.name,
                "3. type": kind,
                "4. region": "United States",
                "5. marketOpen": "09:30",
                "6. marketClose": "16:00",
                "7. timezone": "UTC-04",
                "8. currency": "USD",
                "9. matchScore": score,
            })
        })
        .collect();

    json!({ "bestMatches": matches, "as_of": UtcDateTime::now() })
}
