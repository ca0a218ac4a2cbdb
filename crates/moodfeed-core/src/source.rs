use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream data providers reachable through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Polygon,
    Alphavantage,
    Coinmarketcap,
}

impl ProviderId {
    pub const ALL: [Self; 3] = [Self::Polygon, Self::Alphavantage, Self::Coinmarketcap];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Alphavantage => "alphavantage",
            Self::Coinmarketcap => "coinmarketcap",
        }
    }

    /// Human-facing provider name used in error names and advisories.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Polygon => "Polygon",
            Self::Alphavantage => "AlphaVantage",
            Self::Coinmarketcap => "CoinMarketCap",
        }
    }

    /// Upper-case token used to build environment variable names.
    pub const fn env_token(self) -> &'static str {
        match self {
            Self::Polygon => "POLYGON",
            Self::Alphavantage => "ALPHAVANTAGE",
            Self::Coinmarketcap => "COINMARKETCAP",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "polygon" => Ok(Self::Polygon),
            "alphavantage" | "alpha_vantage" => Ok(Self::Alphavantage),
            "coinmarketcap" | "cmc" => Ok(Self::Coinmarketcap),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("CMC".parse::<ProviderId>(), Ok(ProviderId::Coinmarketcap));
        assert_eq!(" Polygon ".parse::<ProviderId>(), Ok(ProviderId::Polygon));
        assert!("yahoo".parse::<ProviderId>().is_err());
    }
}
