//! Degradation policy shared by every provider client: response cache, the
//! "API disabled" window and synthetic quotes.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::mock::{MockCatalog, SyntheticQuote};
use crate::retry::FetchError;
use crate::{Symbol, UtcDateTime, ValidationError};

/// Advisory attached to data served while live requests are suspended.
pub const DEGRADED_ADVISORY: &str =
    "API temporarily disabled due to rate limits. Using cached/mock data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Failures tolerated before live requests are suspended: with 3, the 4th failure
    /// suspends them. Unlike the circuit breaker, reaching the threshold is not enough.
    pub failure_threshold: u32,
    /// How long live requests stay suspended.
    pub disable_cooldown: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            disable_cooldown: Duration::from_secs(5 * 60),
        }
    }
}

impl FallbackConfig {
    pub fn new(failure_threshold: u32, disable_cooldown: Duration) -> Result<Self, ValidationError> {
        if failure_threshold == 0 {
            return Err(ValidationError::InvalidFallbackThreshold);
        }
        Ok(Self {
            failure_threshold,
            disable_cooldown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackStatus {
    pub api_disabled: bool,
    pub api_disabled_until: Option<UtcDateTime>,
    /// Entries still within their TTL. Expired entries linger until overwritten or cleared
    /// but are not counted.
    pub cache_size: usize,
    pub failure_tally: u32,
}

#[derive(Debug, Clone, Copy)]
struct DisabledWindow {
    until: Instant,
    until_wall: UtcDateTime,
}

#[derive(Debug, Default)]
struct DisableState {
    window: Option<DisabledWindow>,
    failure_tally: u32,
}

impl DisableState {
    /// Whether the window is active; an elapsed window is cleared together with the tally.
    fn check_window(&mut self, now: Instant) -> bool {
        match self.window {
            Some(window) if now < window.until => true,
            Some(_) => {
                self.window = None;
                self.failure_tally = 0;
                info!("API disable window elapsed, resuming live requests");
                false
            }
            None => false,
        }
    }
}

/// Cache, disable flag and mock catalog shared by all provider clients of one context.
#[derive(Debug)]
pub struct FallbackService {
    config: FallbackConfig,
    state: Mutex<DisableState>,
    cache: CacheStore,
    mocks: MockCatalog,
}

impl Default for FallbackService {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

impl FallbackService {
    pub fn new(config: FallbackConfig) -> Self {
        Self::with_catalog(config, MockCatalog::default())
    }

    pub fn with_catalog(config: FallbackConfig, mocks: MockCatalog) -> Self {
        Self {
            config,
            state: Mutex::new(DisableState::default()),
            cache: CacheStore::new(),
            mocks,
        }
    }

    pub fn config(&self) -> FallbackConfig {
        self.config
    }

    pub fn is_api_disabled(&self) -> bool {
        self.lock().check_window(Instant::now())
    }

    pub fn api_disabled_until(&self) -> Option<UtcDateTime> {
        let mut state = self.lock();
        if state.check_window(Instant::now()) {
            state.window.map(|window| window.until_wall)
        } else {
            None
        }
    }

    /// Records a failed upstream call and decides whether callers should switch to mock data.
    ///
    /// Returns `true` while the API is disabled, or when this failure disables it: either the
    /// tally went past the threshold or the upstream reported a rate limit.
    pub fn handle_api_error(&self, error: &FetchError) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        if state.check_window(now) {
            return true;
        }

        state.failure_tally = state.failure_tally.saturating_add(1);
        let rate_limited = error.is_rate_limit();
        if !rate_limited && state.failure_tally <= self.config.failure_threshold {
            return false;
        }

        let window = self.open_window(now, self.config.disable_cooldown);
        state.window = Some(window);
        warn!(
            failures = state.failure_tally,
            rate_limited,
            until = %window.until_wall,
            error = %error,
            "disabling live API requests, serving cached/mock data"
        );
        true
    }

    pub fn record_success(&self) {
        self.lock().failure_tally = 0;
    }

    /// Manual override: clears the disable window and the failure tally.
    pub fn enable_api(&self) {
        *self.lock() = DisableState::default();
        info!("live API requests re-enabled");
    }

    /// Suspends live requests for `duration` (offline mode, operator action).
    pub fn disable_for(&self, duration: Duration) {
        let window = self.open_window(Instant::now(), duration);
        self.lock().window = Some(window);
        info!(until = %window.until_wall, "live API requests disabled");
    }

    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn cache_set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.cache.set(key, value, ttl);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("response cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.cache.fresh_len()
    }

    pub fn mocks(&self) -> &MockCatalog {
        &self.mocks
    }

    pub fn mock_quote(&self, symbol: &Symbol) -> Option<SyntheticQuote> {
        self.mocks.quote(symbol)
    }

    pub fn mock_quotes(&self, symbols: &[Symbol]) -> Vec<SyntheticQuote> {
        self.mocks.quotes(symbols)
    }

    pub fn status(&self) -> FallbackStatus {
        let (api_disabled, api_disabled_until, failure_tally) = {
            let mut state = self.lock();
            let disabled = state.check_window(Instant::now());
            (
                disabled,
                state.window.map(|window| window.until_wall),
                state.failure_tally,
            )
        };

        FallbackStatus {
            api_disabled,
            api_disabled_until,
            cache_size: self.cache.fresh_len(),
            failure_tally,
        }
    }

    fn open_window(&self, now: Instant, duration: Duration) -> DisabledWindow {
        DisabledWindow {
            until: now.checked_add(duration).unwrap_or(now),
            until_wall: UtcDateTime::from_now(duration),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn server_error() -> FetchError {
        FetchError::Server {
            status: 503,
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disables_after_tally_exceeds_threshold() {
        let fallback = FallbackService::default();

        assert!(!fallback.handle_api_error(&server_error()));
        assert!(!fallback.handle_api_error(&server_error()));
        assert!(!fallback.handle_api_error(&server_error()));
        assert!(!fallback.is_api_disabled());

        assert_eq!(fallback.status().failure_tally, 3);

        assert!(fallback.handle_api_error(&server_error()));
        assert!(fallback.is_api_disabled());
        assert!(fallback.api_disabled_until().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_window_expires_without_enable_call() {
        let fallback = FallbackService::new(FallbackConfig {
            failure_threshold: 1,
            disable_cooldown: Duration::from_secs(300),
        });
        fallback.handle_api_error(&server_error());
        assert!(fallback.handle_api_error(&server_error()));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(fallback.is_api_disabled());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!fallback.is_api_disabled());
        assert_eq!(fallback.status().failure_tally, 0);
        assert_eq!(fallback.status().api_disabled_until, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_disable_immediately() {
        let fallback = FallbackService::default();
        let error = FetchError::Upstream {
            message: String::from("You have exceeded your API rate limit"),
            rate_limited: true,
        };

        assert!(fallback.handle_api_error(&error));
        assert!(fallback.is_api_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_tally_and_enable_clears_window() {
        let fallback = FallbackService::default();
        fallback.handle_api_error(&server_error());
        fallback.handle_api_error(&server_error());
        fallback.record_success();
        assert_eq!(fallback.status().failure_tally, 0);

        fallback.disable_for(Duration::from_secs(60));
        assert!(fallback.is_api_disabled());
        fallback.enable_api();
        assert!(!fallback.is_api_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_cache_size() {
        let fallback = FallbackService::default();
        fallback.cache_set("polygon:/v3/reference/tickers", json!({}), Duration::from_secs(60));
        fallback.cache_set("coinmarketcap:/v1/global-metrics/quotes/latest", json!({}), Duration::ZERO);

        let status = fallback.status();
        assert_eq!(status.cache_size, 1);
        assert!(!status.api_disabled);

        fallback.clear_cache();
        assert_eq!(fallback.status().cache_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_ignores_expired_entries() {
        let fallback = FallbackService::default();
        fallback.cache_set("alphavantage:/query?function=GLOBAL_QUOTE", json!({}), Duration::from_secs(30));
        fallback.cache_set("polygon:/dividends?ticker=MSFT", json!({}), Duration::from_secs(3600));

        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(fallback.status().cache_size, 1);
        assert_eq!(fallback.cache_size(), 1);
    }

    #[test]
    fn serves_mock_quotes() {
        let fallback = FallbackService::default();
        let symbols = Symbol::parse_many(["AAPL", "BTC", "NOPE"]).expect("valid symbols");

        assert_eq!(fallback.mock_quotes(&symbols).len(), 2);
        assert!(fallback.mock_quote(&symbols[0]).is_some());
    }
}
