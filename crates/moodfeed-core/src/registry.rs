//! Construction of the three provider clients around one shared fallback service.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapters::{AlphaVantageClient, CoinMarketCapClient, PolygonClient, ProviderHandle};
use crate::config::ResilienceConfig;
use crate::fallback::FallbackService;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::mock::MockCatalog;
use crate::provider::ProviderStatus;
use crate::{CoreError, ProviderId};

/// How long offline mode keeps live requests suspended.
const OFFLINE_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Builder for [`MarketClients`].
#[derive(Default)]
pub struct MarketClientsBuilder {
    config: ResilienceConfig,
    http: Option<Arc<dyn HttpClient>>,
    fallback: Option<Arc<FallbackService>>,
    mocks: Option<MockCatalog>,
    offline: bool,
}

impl MarketClientsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads `MOODFEED_*` and `<PROVIDER>_API_KEY` variables on top of the current config.
    pub fn with_env(mut self) -> Result<Self, CoreError> {
        self.config.apply_env(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Shares an existing fallback service instead of creating one from the config.
    pub fn with_fallback(mut self, fallback: Arc<FallbackService>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_mock_catalog(mut self, mocks: MockCatalog) -> Self {
        self.mocks = Some(mocks);
        self
    }

    pub fn with_api_key(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        let key = key.into();
        let endpoint = match provider {
            ProviderId::Polygon => &mut self.config.providers.polygon,
            ProviderId::Alphavantage => &mut self.config.providers.alphavantage,
            ProviderId::Coinmarketcap => &mut self.config.providers.coinmarketcap,
        };
        endpoint.api_key = Some(key);
        self
    }

    pub fn with_base_url(mut self, provider: ProviderId, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let endpoint = match provider {
            ProviderId::Polygon => &mut self.config.providers.polygon,
            ProviderId::Alphavantage => &mut self.config.providers.alphavantage,
            ProviderId::Coinmarketcap => &mut self.config.providers.coinmarketcap,
        };
        endpoint.base_url = Some(base_url);
        self
    }

    /// Starts with live requests suspended; every call is served from cache or mocks.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn build(self) -> Result<MarketClients, CoreError> {
        let config = self.config;
        config.validate()?;

        let fallback = match self.fallback {
            Some(fallback) => fallback,
            None => Arc::new(FallbackService::with_catalog(
                config.fallback_config()?,
                self.mocks.unwrap_or_default(),
            )),
        };
        if self.offline {
            fallback.disable_for(OFFLINE_WINDOW);
        }
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        let polygon = PolygonClient::new(
            config.provider_policy(ProviderId::Polygon)?,
            config.base_url(ProviderId::Polygon),
            config.api_key(ProviderId::Polygon),
            Arc::clone(&http),
            Arc::clone(&fallback),
        );
        let alphavantage = AlphaVantageClient::new(
            config.provider_policy(ProviderId::Alphavantage)?,
            config.base_url(ProviderId::Alphavantage),
            config.api_key(ProviderId::Alphavantage),
            Arc::clone(&http),
            Arc::clone(&fallback),
        );
        let coinmarketcap = CoinMarketCapClient::new(
            config.provider_policy(ProviderId::Coinmarketcap)?,
            config.base_url(ProviderId::Coinmarketcap),
            config.api_key(ProviderId::Coinmarketcap),
            http,
            Arc::clone(&fallback),
        );

        info!(offline = self.offline, "market clients ready");
        Ok(MarketClients {
            polygon,
            alphavantage,
            coinmarketcap,
            fallback,
        })
    }
}

/// One client per provider plus the fallback service they share.
#[derive(Debug)]
pub struct MarketClients {
    pub polygon: PolygonClient,
    pub alphavantage: AlphaVantageClient,
    pub coinmarketcap: CoinMarketCapClient,
    pub fallback: Arc<FallbackService>,
}

impl MarketClients {
    pub fn builder() -> MarketClientsBuilder {
        MarketClientsBuilder::new()
    }

    pub fn handle(&self, provider: ProviderId) -> &dyn ProviderHandle {
        match provider {
            ProviderId::Polygon => &self.polygon,
            ProviderId::Alphavantage => &self.alphavantage,
            ProviderId::Coinmarketcap => &self.coinmarketcap,
        }
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        ProviderId::ALL
            .iter()
            .map(|provider| self.handle(*provider).status())
            .collect()
    }

    /// Clears the shared cache, re-enables the API and closes every breaker.
    pub fn reset_all(&self) {
        self.fallback.clear_cache();
        self.fallback.enable_api();
        for provider in ProviderId::ALL {
            self.handle(provider).reset_circuit_breaker();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapters::TickersQuery;
    use crate::provider::FetchOptions;
    use crate::test_support::RecordingHttpClient;

    #[test]
    fn clients_share_one_fallback_service() {
        let clients = MarketClients::builder()
            .with_http_client(RecordingHttpClient::new(Vec::new()))
            .build()
            .expect("default config builds");

        clients.fallback.cache_set("polygon:/tickers", json!(1), Duration::from_secs(60));

        for status in clients.statuses() {
            assert_eq!(status.cache_size, 1);
        }
        assert_eq!(
            clients.handle(ProviderId::Coinmarketcap).provider_client().base_url(),
            "http://127.0.0.1:5000/api/proxy/coinmarketcap"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_clients_never_touch_the_network() {
        let http = RecordingHttpClient::new(Vec::new());
        let clients = MarketClients::builder()
            .with_http_client(http.clone())
            .offline(true)
            .build()
            .expect("builds");

        let fetched = clients
            .polygon
            .tickers(&TickersQuery::default(), FetchOptions::default())
            .await
            .expect("degraded data");

        assert!(fetched.is_degraded());
        assert!(http.requests().is_empty());
    }

    #[test]
    fn explicit_key_and_base_url_are_used() {
        let clients = MarketClients::builder()
            .with_http_client(RecordingHttpClient::new(Vec::new()))
            .with_base_url(ProviderId::Polygon, "https://api.polygon.io/v3/reference/")
            .with_api_key(ProviderId::Polygon, "pk")
            .build()
            .expect("builds");

        assert_eq!(
            clients.polygon.provider_client().base_url(),
            "https://api.polygon.io/v3/reference"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = MarketClients::builder()
            .with_http_client(RecordingHttpClient::new(Vec::new()))
            .with_base_url(ProviderId::Alphavantage, "localhost:5000")
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn reset_all_clears_shared_state() {
        let clients = MarketClients::builder()
            .with_http_client(RecordingHttpClient::new(Vec::new()))
            .build()
            .expect("builds");
        clients.fallback.cache_set("polygon:/tickers", json!(1), Duration::from_secs(60));
        clients.fallback.disable_for(Duration::from_secs(60));
        clients.coinmarketcap.provider_client().breaker().trip_for(Duration::from_secs(600));

        clients.reset_all();

        for status in clients.statuses() {
            assert!(!status.api_disabled);
            assert_eq!(status.cache_size, 0);
            assert_eq!(status.circuit.failure_count, 0);
        }
    }
}
