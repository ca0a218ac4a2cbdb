use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use crate::ProviderId;

/// Client-side request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub window: Duration,
    pub limit: u32,
}

/// Cache lifetime per kind of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub quotes: Duration,
    pub crypto_quotes: Duration,
    pub time_series: Duration,
    pub dividends: Duration,
    pub tickers: Duration,
    pub search: Duration,
    pub global_metrics: Duration,
    /// Slow-moving reference data: company overviews, coin metadata.
    pub reference: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            quotes: Duration::from_secs(30),
            crypto_quotes: Duration::from_secs(30),
            time_series: Duration::from_secs(5 * 60),
            dividends: Duration::from_secs(60 * 60),
            tickers: Duration::from_secs(60 * 60),
            search: Duration::from_secs(5 * 60),
            global_metrics: Duration::from_secs(5 * 60),
            reference: Duration::from_secs(60 * 60),
        }
    }
}

/// Resilience settings for one provider client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub quota: Option<QuotaPolicy>,
    /// Cooldown the breaker is tripped for when the upstream reports a rate limit.
    pub rate_limit_cooldown: Option<Duration>,
    pub ttls: CacheTtls,
}

impl ProviderPolicy {
    pub fn polygon_default() -> Self {
        Self {
            provider_id: ProviderId::Polygon,
            retry: RetryPolicy {
                timeout: Duration::from_secs(60),
                ..RetryPolicy::default()
            },
            breaker: CircuitBreakerConfig::default(),
            quota: None,
            rate_limit_cooldown: None,
            ttls: CacheTtls::default(),
        }
    }

    pub fn alphavantage_default() -> Self {
        Self {
            provider_id: ProviderId::Alphavantage,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            quota: Some(QuotaPolicy {
                window: Duration::from_secs(60),
                limit: 5,
            }),
            rate_limit_cooldown: None,
            ttls: CacheTtls::default(),
        }
    }

    pub fn coinmarketcap_default() -> Self {
        Self {
            provider_id: ProviderId::Coinmarketcap,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
            },
            quota: Some(QuotaPolicy {
                window: Duration::from_secs(60),
                limit: 333,
            }),
            rate_limit_cooldown: Some(Duration::from_secs(10 * 60)),
            ttls: CacheTtls::default(),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Polygon => Self::polygon_default(),
            ProviderId::Alphavantage => Self::alphavantage_default(),
            ProviderId::Coinmarketcap => Self::coinmarketcap_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphavantage_policy_matches_free_tier() {
        let policy = ProviderPolicy::alphavantage_default();

        assert_eq!(policy.provider_id, ProviderId::Alphavantage);
        assert_eq!(
            policy.quota,
            Some(QuotaPolicy {
                window: Duration::from_secs(60),
                limit: 5
            })
        );
        assert_eq!(policy.rate_limit_cooldown, None);
    }

    #[test]
    fn coinmarketcap_policy_trips_on_rate_limits() {
        let policy = ProviderPolicy::default_for(ProviderId::Coinmarketcap);

        assert_eq!(policy.breaker.failure_threshold, 2);
        assert_eq!(policy.rate_limit_cooldown, Some(Duration::from_secs(600)));
    }

    #[test]
    fn polygon_policy_allows_slow_responses() {
        let policy = ProviderPolicy::polygon_default();

        assert_eq!(policy.retry.timeout, Duration::from_secs(60));
        assert_eq!(policy.breaker.failure_threshold, 3);
        assert_eq!(policy.ttls.dividends, Duration::from_secs(3_600));
        assert!(policy.quota.is_none());
    }
}
