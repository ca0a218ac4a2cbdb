//! Provider clients built on [`ProviderClient`](crate::provider::ProviderClient).
//!
//! Each client maps typed arguments onto the provider's proxy endpoint, recognizes the
//! provider's in-body error conventions and renders mock data in the provider's own shape.

mod alphavantage;
mod coinmarketcap;
mod polygon;

pub use alphavantage::{AlphaVantageClient, IntradayInterval, OutputSize};
pub use coinmarketcap::{CoinMarketCapClient, ListingsQuery, TrendingPeriod};
pub use polygon::{PolygonClient, QuotesQuery, TickersQuery};

use crate::provider::{ProviderClient, ProviderStatus};

/// Status and manual-recovery operations every provider client exposes.
pub trait ProviderHandle {
    fn provider_client(&self) -> &ProviderClient;

    fn status(&self) -> ProviderStatus {
        self.provider_client().status()
    }

    fn clear_cache(&self) {
        self.provider_client().clear_cache();
    }

    fn enable_api(&self) {
        self.provider_client().enable_api();
    }

    fn reset_circuit_breaker(&self) {
        self.provider_client().reset_circuit_breaker();
    }
}
