//! Resilience settings loaded from an optional JSON file and the environment.
//!
//! Precedence is defaults, then the file, then `MOODFEED_*` environment variables.
//! Everything is validated once, before any client is built.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::fallback::FallbackConfig;
use crate::provider_policy::{CacheTtls, ProviderPolicy};
use crate::retry::RetryPolicy;
use crate::{CoreError, ProviderId, ValidationError};

/// Same-origin proxy every provider is reached through unless overridden.
pub const DEFAULT_PROXY_ORIGIN: &str = "http://127.0.0.1:5000/api/proxy";

/// Overrides applied on top of each provider's default retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub base_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl RetryOverrides {
    fn apply(&self, mut policy: RetryPolicy) -> Result<RetryPolicy, ValidationError> {
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            policy.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(base_delay_ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(base_delay_ms);
        }
        if let Some(multiplier) = self.backoff_multiplier {
            policy.backoff_multiplier = multiplier;
        }
        policy.validate()?;
        Ok(policy)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

impl BreakerOverrides {
    fn apply(&self, config: CircuitBreakerConfig) -> Result<CircuitBreakerConfig, ValidationError> {
        CircuitBreakerConfig::new(
            self.failure_threshold.unwrap_or(config.failure_threshold),
            self.cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(config.cooldown),
        )
    }
}

/// Shared fallback service settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        let config = FallbackConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            cooldown_ms: u64::try_from(config.disable_cooldown.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Cache lifetime overrides in seconds, per kind of data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtlOverrides {
    pub quotes_secs: Option<u64>,
    pub crypto_quotes_secs: Option<u64>,
    pub time_series_secs: Option<u64>,
    pub dividends_secs: Option<u64>,
    pub tickers_secs: Option<u64>,
    pub search_secs: Option<u64>,
    pub global_metrics_secs: Option<u64>,
    pub reference_secs: Option<u64>,
}

impl TtlOverrides {
    fn apply(&self, ttls: CacheTtls) -> CacheTtls {
        let pick = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        CacheTtls {
            quotes: pick(self.quotes_secs, ttls.quotes),
            crypto_quotes: pick(self.crypto_quotes_secs, ttls.crypto_quotes),
            time_series: pick(self.time_series_secs, ttls.time_series),
            dividends: pick(self.dividends_secs, ttls.dividends),
            tickers: pick(self.tickers_secs, ttls.tickers),
            search: pick(self.search_secs, ttls.search),
            global_metrics: pick(self.global_metrics_secs, ttls.global_metrics),
            reference: pick(self.reference_secs, ttls.reference),
        }
    }
}

/// Where a provider is reached and with which key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderEndpoint {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderEndpoints {
    pub polygon: ProviderEndpoint,
    pub alphavantage: ProviderEndpoint,
    pub coinmarketcap: ProviderEndpoint,
}

impl ProviderEndpoints {
    pub fn get(&self, provider: ProviderId) -> &ProviderEndpoint {
        match provider {
            ProviderId::Polygon => &self.polygon,
            ProviderId::Alphavantage => &self.alphavantage,
            ProviderId::Coinmarketcap => &self.coinmarketcap,
        }
    }

    fn get_mut(&mut self, provider: ProviderId) -> &mut ProviderEndpoint {
        match provider {
            ProviderId::Polygon => &mut self.polygon,
            ProviderId::Alphavantage => &mut self.alphavantage,
            ProviderId::Coinmarketcap => &mut self.coinmarketcap,
        }
    }
}

/// Top-level configuration for every provider client and the shared fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    pub retry: RetryOverrides,
    pub breaker: BreakerOverrides,
    pub fallback: FallbackSettings,
    pub ttls: TtlOverrides,
    pub providers: ProviderEndpoints,
}

impl ResilienceConfig {
    /// Loads from `path` (if any) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Applies `MOODFEED_*` overrides and provider keys from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        set_parsed(&read, "MOODFEED_MAX_RETRIES", &mut self.retry.max_retries)?;
        set_parsed(&read, "MOODFEED_TIMEOUT_MS", &mut self.retry.timeout_ms)?;
        set_parsed(&read, "MOODFEED_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        set_parsed(
            &read,
            "MOODFEED_BACKOFF_MULTIPLIER",
            &mut self.retry.backoff_multiplier,
        )?;
        set_parsed(
            &read,
            "MOODFEED_BREAKER_THRESHOLD",
            &mut self.breaker.failure_threshold,
        )?;
        set_parsed(&read, "MOODFEED_BREAKER_COOLDOWN_MS", &mut self.breaker.cooldown_ms)?;

        let mut fallback_threshold = None;
        set_parsed(&read, "MOODFEED_FALLBACK_THRESHOLD", &mut fallback_threshold)?;
        if let Some(threshold) = fallback_threshold {
            self.fallback.failure_threshold = threshold;
        }
        let mut fallback_cooldown = None;
        set_parsed(&read, "MOODFEED_FALLBACK_COOLDOWN_MS", &mut fallback_cooldown)?;
        if let Some(cooldown_ms) = fallback_cooldown {
            self.fallback.cooldown_ms = cooldown_ms;
        }

        for provider in ProviderId::ALL {
            let token = provider.env_token();
            let endpoint = self.providers.get_mut(provider);
            let key = read(&format!("MOODFEED_{token}_API_KEY"))
                .or_else(|| read(&format!("{token}_API_KEY")));
            if key.is_some() {
                endpoint.api_key = key;
            }
            if let Some(base_url) = read(&format!("MOODFEED_{token}_BASE_URL")) {
                endpoint.base_url = Some(base_url.trim().to_owned());
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.fallback_config()?;
        for provider in ProviderId::ALL {
            self.provider_policy(provider)?;
            let base_url = self.base_url(provider);
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ValidationError::InvalidBaseUrl {
                    provider: provider.to_string(),
                    value: base_url,
                });
            }
        }
        Ok(())
    }

    /// The provider's default policy with every override applied.
    pub fn provider_policy(&self, provider: ProviderId) -> Result<ProviderPolicy, ValidationError> {
        let defaults = ProviderPolicy::default_for(provider);
        Ok(ProviderPolicy {
            retry: self.retry.apply(defaults.retry)?,
            breaker: self.breaker.apply(defaults.breaker)?,
            ttls: self.ttls.apply(defaults.ttls),
            ..defaults
        })
    }

    pub fn fallback_config(&self) -> Result<FallbackConfig, ValidationError> {
        FallbackConfig::new(
            self.fallback.failure_threshold,
            Duration::from_millis(self.fallback.cooldown_ms),
        )
    }

    pub fn base_url(&self, provider: ProviderId) -> String {
        self.providers
            .get(provider)
            .base_url
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_PROXY_ORIGIN}/{}", provider.as_str()))
    }

    pub fn api_key(&self, provider: ProviderId) -> Option<String> {
        self.providers.get(provider).api_key.clone()
    }
}

fn set_parsed<T, F>(read: &F, name: &str, slot: &mut Option<T>) -> Result<(), CoreError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = read(name) else {
        return Ok(());
    };
    let parsed = raw.trim().parse().map_err(|_| CoreError::InvalidEnv {
        name: name.to_owned(),
        value: raw.clone(),
    })?;
    *slot = Some(parsed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_point_at_local_proxy() {
        let config = ResilienceConfig::load_with(None, env(&[])).expect("defaults are valid");

        assert_eq!(
            config.base_url(ProviderId::Polygon),
            "http://127.0.0.1:5000/api/proxy/polygon"
        );
        assert_eq!(config.api_key(ProviderId::Coinmarketcap), None);
        assert_eq!(
            config.provider_policy(ProviderId::Alphavantage).expect("policy"),
            ProviderPolicy::alphavantage_default()
        );
    }

    #[test]
    fn file_values_are_overridden_by_environment() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "retry": {{"max_retries": 5, "timeout_ms": 2000}},
                "fallback": {{"failure_threshold": 4}},
                "ttls": {{"quotes_secs": 10}},
                "providers": {{"polygon": {{"api_key": "from-file"}}}}
            }}"#
        )
        .expect("write config");

        let config = ResilienceConfig::load_with(
            Some(file.path()),
            env(&[
                ("MOODFEED_MAX_RETRIES", "1"),
                ("POLYGON_API_KEY", "from-env"),
                ("MOODFEED_COINMARKETCAP_BASE_URL", "https://pro-api.example.com/v1"),
            ]),
        )
        .expect("valid config");

        let policy = config.provider_policy(ProviderId::Polygon).expect("policy");
        assert_eq!(policy.retry.max_retries, 1);
        assert_eq!(policy.retry.timeout, Duration::from_millis(2_000));
        assert_eq!(policy.ttls.quotes, Duration::from_secs(10));
        assert_eq!(config.fallback_config().expect("fallback").failure_threshold, 4);
        assert_eq!(config.api_key(ProviderId::Polygon).as_deref(), Some("from-env"));
        assert_eq!(
            config.base_url(ProviderId::Coinmarketcap),
            "https://pro-api.example.com/v1"
        );
    }

    #[test]
    fn prefixed_key_wins_over_bare_key() {
        let config = ResilienceConfig::load_with(
            None,
            env(&[
                ("MOODFEED_ALPHAVANTAGE_API_KEY", "prefixed"),
                ("ALPHAVANTAGE_API_KEY", "bare"),
            ]),
        )
        .expect("valid config");

        assert_eq!(
            config.api_key(ProviderId::Alphavantage).as_deref(),
            Some("prefixed")
        );
    }

    #[test]
    fn unparsable_environment_value_is_rejected() {
        let error = ResilienceConfig::load_with(None, env(&[("MOODFEED_TIMEOUT_MS", "soon")]))
            .expect_err("invalid env");

        assert!(matches!(
            error,
            CoreError::InvalidEnv { ref name, .. } if name == "MOODFEED_TIMEOUT_MS"
        ));
    }

    #[test]
    fn invalid_overrides_fail_validation() {
        let zero_threshold =
            ResilienceConfig::load_with(None, env(&[("MOODFEED_BREAKER_THRESHOLD", "0")]));
        assert!(matches!(
            zero_threshold,
            Err(CoreError::Validation(ValidationError::InvalidBreakerThreshold))
        ));

        let flat_backoff =
            ResilienceConfig::load_with(None, env(&[("MOODFEED_BACKOFF_MULTIPLIER", "1.0")]));
        assert!(matches!(
            flat_backoff,
            Err(CoreError::Validation(ValidationError::InvalidRetryPolicy {
                field: "backoff_multiplier",
                ..
            }))
        ));

        let bad_url = ResilienceConfig::load_with(
            None,
            env(&[("MOODFEED_POLYGON_BASE_URL", "ftp://example.com")]),
        );
        assert!(matches!(
            bad_url,
            Err(CoreError::Validation(ValidationError::InvalidBaseUrl { .. }))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = ResilienceConfig::load_with(Some(Path::new("/nonexistent/moodfeed.json")), env(&[]))
            .expect_err("missing file");

        assert!(error.to_string().contains("/nonexistent/moodfeed.json"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ResilienceConfig::from_json_str(r#"{"retries": 3}"#).is_err());
    }
}
