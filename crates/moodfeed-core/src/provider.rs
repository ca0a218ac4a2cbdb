//! Request pipeline shared by all provider clients.
//!
//! Order of checks for every call:
//!
//! 1. API disabled: serve cached or mock data with an advisory, no network.
//! 2. Fresh cache entry: serve it, no network.
//! 3. Circuit open or local quota spent: fail fast, no network.
//! 4. Retry executor, then provider-specific payload inspection.
//! 5. Failures feed the breaker and the fallback tally, which decides between
//!    degraded data and a [`ProviderError`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::CacheMode;
use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::fallback::{FallbackService, DEGRADED_ADVISORY};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::mock::MockCatalog;
use crate::provider_policy::ProviderPolicy;
use crate::retry::{embedded_error, FetchError, RetryExecutor};
use crate::throttling::ThrottlingQueue;
use crate::timeout::CancelSignal;
use crate::{ProviderId, UtcDateTime};

/// Finds provider-specific errors inside a 200 response body.
pub type PayloadInspector = fn(&Value) -> Option<FetchError>;

type MockRenderer = Box<dyn FnOnce(&MockCatalog) -> Value + Send + Sync>;

/// Per-call knobs chosen by the caller.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub cache_mode: CacheMode,
    pub cancel: Option<CancelSignal>,
}

impl FetchOptions {
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// One logical request to a provider endpoint, with the mock data to use if it degrades.
pub struct ProviderCall {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub ttl: Duration,
    pub options: FetchOptions,
    mock: MockRenderer,
}

impl ProviderCall {
    pub fn new<F>(endpoint: impl Into<String>, ttl: Duration, mock: F) -> Self
    where
        F: FnOnce(&MockCatalog) -> Value + Send + Sync + 'static,
    {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
            ttl,
            options: FetchOptions::default(),
            mock: Box::new(mock),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// `provider:endpoint?query`. Credentials are never part of the key.
    pub fn cache_key(&self, provider: ProviderId) -> String {
        if self.query.is_empty() {
            return format!("{provider}:{}", self.endpoint);
        }
        let query = self
            .query
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{provider}:{}?{query}", self.endpoint)
    }
}

impl std::fmt::Debug for ProviderCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCall")
            .field("endpoint", &self.endpoint)
            .field("query", &self.query)
            .field("ttl", &self.ttl)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Where degraded data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOrigin {
    Cache,
    Mock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub data: T,
    pub origin: DataOrigin,
    pub advisory: String,
}

/// Successful outcome of a provider call. Degraded data is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Live(T),
    Cached(T),
    Degraded(Degraded<T>),
}

impl<T> Fetched<T> {
    pub fn data(&self) -> &T {
        match self {
            Self::Live(data) | Self::Cached(data) => data,
            Self::Degraded(degraded) => &degraded.data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Self::Live(data) | Self::Cached(data) => data,
            Self::Degraded(degraded) => degraded.data,
        }
    }

    pub fn advisory(&self) -> Option<&str> {
        match self {
            Self::Degraded(degraded) => Some(&degraded.advisory),
            Self::Live(_) | Self::Cached(_) => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Self::Live(data) => Fetched::Live(f(data)),
            Self::Cached(data) => Fetched::Cached(f(data)),
            Self::Degraded(degraded) => Fetched::Degraded(Degraded {
                data: f(degraded.data),
                origin: degraded.origin,
                advisory: degraded.advisory,
            }),
        }
    }
}

/// Failure surfaced to the caller, scoped to the provider that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} API error: {error}", .provider.display_name())]
pub struct ProviderError {
    pub provider: ProviderId,
    #[source]
    pub error: FetchError,
}

impl ProviderError {
    pub fn new(provider: ProviderId, error: FetchError) -> Self {
        Self { provider, error }
    }

    /// Provider-scoped error name, e.g. `PolygonApiError`.
    pub fn name(&self) -> String {
        format!("{}ApiError", self.provider.display_name())
    }
}

/// Synchronous health view for status panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub api_disabled: bool,
    pub api_disabled_until: Option<UtcDateTime>,
    pub cache_size: usize,
    pub circuit: CircuitSnapshot,
}

/// Resilient client for one provider: own breaker and quota, shared fallback.
pub struct ProviderClient {
    provider: ProviderId,
    base_url: String,
    auth: HttpAuth,
    policy: ProviderPolicy,
    executor: RetryExecutor,
    breaker: CircuitBreaker,
    throttle: Option<ThrottlingQueue>,
    fallback: Arc<FallbackService>,
    inspect: PayloadInspector,
}

impl ProviderClient {
    pub fn new(
        policy: ProviderPolicy,
        base_url: impl Into<String>,
        auth: HttpAuth,
        http: Arc<dyn HttpClient>,
        fallback: Arc<FallbackService>,
    ) -> Self {
        let provider = policy.provider_id;
        Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth,
            breaker: CircuitBreaker::named(provider.as_str(), policy.breaker),
            throttle: policy.quota.as_ref().map(ThrottlingQueue::from_policy),
            executor: RetryExecutor::new(http),
            policy,
            fallback,
            inspect: embedded_error,
        }
    }

    pub fn with_inspector(mut self, inspect: PayloadInspector) -> Self {
        self.inspect = inspect;
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn fallback(&self) -> &Arc<FallbackService> {
        &self.fallback
    }

    pub async fn fetch(&self, call: ProviderCall) -> Result<Fetched<Value>, ProviderError> {
        let key = call.cache_key(self.provider);

        if self.fallback.is_api_disabled() {
            debug!(provider = %self.provider, key = %key, "API disabled, serving degraded data");
            return Ok(self.degraded(&key, call));
        }

        if call.options.cache_mode.reads() {
            if let Some(value) = self.fallback.cache_get(&key) {
                debug!(provider = %self.provider, key = %key, "serving cached response");
                return Ok(Fetched::Cached(value));
            }
        }

        match self.fetch_live(&call).await {
            Ok(value) => {
                self.breaker.record_success();
                self.fallback.record_success();
                if call.options.cache_mode.writes() {
                    self.fallback.cache_set(key, value.clone(), call.ttl);
                }
                Ok(Fetched::Live(value))
            }
            Err(error) => self.on_failure(error, &key, call),
        }
    }

    pub fn status(&self) -> ProviderStatus {
        let fallback = self.fallback.status();
        ProviderStatus {
            provider: self.provider,
            api_disabled: fallback.api_disabled,
            api_disabled_until: fallback.api_disabled_until,
            cache_size: fallback.cache_size,
            circuit: self.breaker.snapshot(),
        }
    }

    pub fn clear_cache(&self) {
        self.fallback.clear_cache();
    }

    pub fn enable_api(&self) {
        self.fallback.enable_api();
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    async fn fetch_live(&self, call: &ProviderCall) -> Result<Value, FetchError> {
        if !self.breaker.allow_request() {
            return Err(FetchError::CircuitOpen {
                retry_in: self.breaker.retry_in().unwrap_or_default(),
            });
        }

        if let Some(throttle) = &self.throttle {
            throttle
                .acquire()
                .map_err(|retry_in| FetchError::Throttled { retry_in })?;
        }

        let request = self.build_request(call);
        let body = self
            .executor
            .execute_json(&request, &self.policy.retry, call.options.cancel.as_ref())
            .await?;

        match (self.inspect)(&body) {
            Some(error) => Err(error),
            None => Ok(body),
        }
    }

    fn build_request(&self, call: &ProviderCall) -> HttpRequest {
        let mut request = HttpRequest::get(format!("{}{}", self.base_url, call.endpoint))
            .with_header("accept", "application/json");
        for (name, value) in &call.query {
            request = request.with_query(name.clone(), value.clone());
        }
        request.with_auth(&self.auth)
    }

    fn on_failure(
        &self,
        error: FetchError,
        key: &str,
        call: ProviderCall,
    ) -> Result<Fetched<Value>, ProviderError> {
        if error.counts_as_upstream_failure() {
            match self.policy.rate_limit_cooldown {
                Some(cooldown) if error.is_rate_limit() => self.breaker.trip_for(cooldown),
                _ => {
                    self.breaker.record_failure();
                }
            }
        }

        // A rate-limit trip outlives the shared disabled window; keep degrading until it closes.
        if matches!(error, FetchError::CircuitOpen { .. }) && self.breaker.is_rate_limited() {
            debug!(provider = %self.provider, key = %key, "rate-limit trip active, serving degraded data");
            return Ok(self.degraded(key, call));
        }

        let terminal = match &error {
            FetchError::Cancelled { .. } | FetchError::CircuitOpen { .. } => true,
            FetchError::Client { status, .. } => !matches!(status, 408 | 429),
            _ => false,
        };

        if !terminal && self.fallback.handle_api_error(&error) {
            warn!(
                provider = %self.provider,
                kind = error.kind().as_str(),
                error = %error,
                "upstream failing, serving degraded data"
            );
            return Ok(self.degraded(key, call));
        }

        debug!(provider = %self.provider, kind = error.kind().as_str(), "surfacing provider error");
        Err(ProviderError::new(self.provider, error))
    }

    fn degraded(&self, key: &str, call: ProviderCall) -> Fetched<Value> {
        let (data, origin) = match self.fallback.cache_get(key) {
            Some(value) => (value, DataOrigin::Cache),
            None => ((call.mock)(self.fallback.mocks()), DataOrigin::Mock),
        };
        Fetched::Degraded(Degraded {
            data,
            origin,
            advisory: String::from(DEGRADED_ADVISORY),
        })
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::fallback::FallbackConfig;
    use crate::http_client::{HttpResponse, TransportFuture};
    use crate::retry::{FailureKind, RetryPolicy};

    struct Scripted {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for Scripted {
        fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().unwrap().push(request.full_url());
                Ok(self
                    .responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| HttpResponse::new(503, "unavailable")))
            })
        }
    }

    fn policy() -> ProviderPolicy {
        ProviderPolicy {
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
                timeout: Duration::from_secs(1),
            },
            ..ProviderPolicy::polygon_default()
        }
    }

    fn client(http: Arc<Scripted>, fallback: Arc<FallbackService>) -> ProviderClient {
        ProviderClient::new(
            policy(),
            "http://proxy.test/api/proxy/polygon/",
            HttpAuth::QueryParam {
                name: String::from("apiKey"),
                value: String::from("secret"),
            },
            http,
            fallback,
        )
    }

    fn tickers_call() -> ProviderCall {
        ProviderCall::new("/v3/reference/tickers", Duration::from_secs(60), |_| {
            json!({"results": [], "mock": true})
        })
        .with_query("limit", 10)
    }

    #[test]
    fn cache_key_excludes_credentials() {
        let call = tickers_call();
        assert_eq!(
            call.cache_key(ProviderId::Polygon),
            "polygon:/v3/reference/tickers?limit=10"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn live_response_is_cached() {
        let http = Scripted::new(vec![HttpResponse::ok_json(r#"{"error":null,"results":[1]}"#)]);
        let client = client(http.clone(), Arc::new(FallbackService::default()));

        let first = client.fetch(tickers_call()).await.expect("live data");
        let second = client.fetch(tickers_call()).await.expect("cached data");

        assert!(first.is_live());
        assert!(second.is_cached());
        assert_eq!(first.data(), second.data());
        assert_eq!(http.calls(), 1);
        assert_eq!(
            http.requests.lock().unwrap()[0],
            "http://proxy.test/api/proxy/polygon/v3/reference/tickers?limit=10&apiKey=secret"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_mode_skips_cache_read() {
        let http = Scripted::new(vec![
            HttpResponse::ok_json(r#"{"results":[1]}"#),
            HttpResponse::ok_json(r#"{"results":[2]}"#),
        ]);
        let client = client(http.clone(), Arc::new(FallbackService::default()));

        client.fetch(tickers_call()).await.expect("live");
        let refreshed = client
            .fetch(tickers_call().with_options(FetchOptions::default().with_cache_mode(CacheMode::Refresh)))
            .await
            .expect("live");

        assert!(refreshed.is_live());
        assert_eq!(refreshed.data(), &json!({"results": [2]}));
        assert_eq!(http.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_api_serves_mock_without_network() {
        let http = Scripted::new(Vec::new());
        let fallback = Arc::new(FallbackService::default());
        fallback.disable_for(Duration::from_secs(60));
        let client = client(http.clone(), fallback);

        let fetched = client.fetch(tickers_call()).await.expect("degraded data");

        assert_eq!(http.calls(), 0);
        assert_eq!(fetched.advisory(), Some(DEGRADED_ADVISORY));
        match fetched {
            Fetched::Degraded(degraded) => assert_eq!(degraded.origin, DataOrigin::Mock),
            other => panic!("expected degraded data, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_api_prefers_cached_data() {
        let http = Scripted::new(vec![HttpResponse::ok_json(r#"{"results":[1]}"#)]);
        let fallback = Arc::new(FallbackService::default());
        let client = client(http.clone(), fallback.clone());
        client.fetch(tickers_call()).await.expect("live");

        fallback.disable_for(Duration::from_secs(60));
        let fetched = client.fetch(tickers_call()).await.expect("degraded data");

        assert_eq!(fetched.data(), &json!({"results": [1]}));
        assert!(matches!(
            fetched,
            Fetched::Degraded(Degraded {
                origin: DataOrigin::Cache,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_error_is_a_failure() {
        let http = Scripted::new(vec![HttpResponse::ok_json(r#"{"error":"bad ticker"}"#)]);
        let client = client(http, Arc::new(FallbackService::default()));

        let error = client.fetch(tickers_call()).await.expect_err("upstream error");

        assert_eq!(error.error.kind(), FailureKind::Upstream);
        assert_eq!(error.name(), "PolygonApiError");
        assert_eq!(client.status().circuit.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_propagate_without_tally() {
        let http = Scripted::new(vec![HttpResponse::new(404, "missing")]);
        let fallback = Arc::new(FallbackService::new(FallbackConfig {
            failure_threshold: 1,
            disable_cooldown: Duration::from_secs(60),
        }));
        let client = client(http, fallback.clone());

        let error = client.fetch(tickers_call()).await.expect_err("terminal");

        assert_eq!(error.error.status(), Some(404));
        assert_eq!(fallback.status().failure_tally, 0);
        assert_eq!(client.status().circuit.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_degrade_to_mock() {
        let http = Scripted::new(Vec::new());
        let fallback = Arc::new(FallbackService::new(FallbackConfig {
            failure_threshold: 1,
            disable_cooldown: Duration::from_secs(60),
        }));
        let client = client(http, fallback.clone());

        assert!(client.fetch(tickers_call()).await.is_err());
        let fetched = client.fetch(tickers_call()).await.expect("degraded");

        assert!(fetched.is_degraded());
        assert_eq!(fetched.data()["mock"], json!(true));
        assert!(client.status().api_disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn escape_hatches_restore_live_mode() {
        let http = Scripted::new(Vec::new());
        let fallback = Arc::new(FallbackService::default());
        let client = client(http, fallback.clone());
        for _ in 0..3 {
            let _ = client.fetch(tickers_call()).await;
        }
        assert!(!client.breaker().allow_request());

        client.reset_circuit_breaker();
        client.enable_api();
        client.clear_cache();

        let status = client.status();
        assert!(!status.api_disabled);
        assert_eq!(status.cache_size, 0);
        assert_eq!(status.circuit.failure_count, 0);
    }
}
