//! # Moodfeed Core
//!
//! Resilient access layer for the market-data providers behind the moodfeed proxy.
//!
//! ## Overview
//!
//! Every outbound request goes through the same pipeline:
//!
//! - **Timeout controller** bounding each attempt, with caller cancellation
//! - **Retry executor** with exponential backoff and a cap on timeout retries
//! - **Circuit breaker** per provider
//! - **Fallback service** shared by all providers: TTL cache, API-disabled window and mock data
//!
//! Callers get a [`Fetched`] value that says whether data is live, cached or degraded.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Polygon, Alpha Vantage and CoinMarketCap clients |
//! | [`cache`] | In-memory TTL cache |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`config`] | JSON and environment configuration |
//! | [`domain`] | Symbols and timestamps |
//! | [`error`] | Validation and configuration errors |
//! | [`fallback`] | Disable window, cache and mock data shared by clients |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`mock`] | Synthetic quotes and series |
//! | [`polling`] | Periodic refresh tasks |
//! | [`provider`] | The fetch pipeline and its result types |
//! | [`provider_policy`] | Per-provider retry, breaker, quota and TTL defaults |
//! | [`registry`] | Builds all clients around one fallback service |
//! | [`retry`] | Retry executor and [`FetchError`] classification |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Client-side request quotas |
//! | [`timeout`] | Per-attempt timeout and cancellation |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use moodfeed_core::{FetchOptions, MarketClients, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clients = MarketClients::builder().with_env()?.build()?;
//!
//!     let quote = clients
//!         .alphavantage
//!         .quote(&Symbol::parse("AAPL")?, FetchOptions::default())
//!         .await?;
//!     if let Some(advisory) = quote.advisory() {
//!         eprintln!("{advisory}");
//!     }
//!     println!("{}", quote.data());
//!     Ok(())
//! }
//! ```
//!
//! ## Security
//!
//! - API keys come from configuration or environment variables and are never logged
//! - Cache keys never include credentials

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod fallback;
pub mod http_client;
pub mod mock;
pub mod polling;
pub mod provider;
pub mod provider_policy;
pub mod registry;
pub mod retry;
pub mod source;
pub mod throttling;
pub mod timeout;

#[cfg(test)]
mod test_support;

// Provider clients
pub use adapters::{
    AlphaVantageClient, CoinMarketCapClient, IntradayInterval, ListingsQuery, OutputSize,
    PolygonClient, ProviderHandle, QuotesQuery, TickersQuery, TrendingPeriod,
};

// Caching and fallback
pub use cache::{CacheMode, CacheStore};
pub use fallback::{FallbackConfig, FallbackService, FallbackStatus, DEGRADED_ADVISORY};
pub use mock::{AssetKind, MockCatalog, SyntheticBar, SyntheticQuote};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};

// Configuration
pub use config::ResilienceConfig;

// Domain models
pub use domain::{join_symbols, Symbol, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    TransportCause, TransportError,
};

// Fetch pipeline
pub use provider::{
    DataOrigin, Degraded, FetchOptions, Fetched, ProviderCall, ProviderClient, ProviderError,
    ProviderStatus,
};
pub use provider_policy::{CacheTtls, ProviderPolicy, QuotaPolicy};
pub use registry::{MarketClients, MarketClientsBuilder};

// Retry and cancellation
pub use polling::{PollingHandle, PollingTask};
pub use retry::{FailureKind, FetchError, RetryExecutor, RetryPolicy};
pub use timeout::{CancelReason, CancelSignal, TimeoutController};

// Source identifiers
pub use source::ProviderId;

// Throttling
pub use throttling::ThrottlingQueue;
