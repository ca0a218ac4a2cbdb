use thiserror::Error;

/// Validation and contract errors exposed by `moodfeed-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid provider '{value}', expected one of polygon, alphavantage, coinmarketcap")]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("retry policy field '{field}' {reason}")]
    InvalidRetryPolicy {
        field: &'static str,
        reason: &'static str,
    },
    #[error("circuit breaker threshold must be greater than zero")]
    InvalidBreakerThreshold,
    #[error("fallback failure threshold must be greater than zero")]
    InvalidFallbackThreshold,
    #[error("base url for '{provider}' must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { provider: String, value: String },

    #[error("invalid interval '{value}', expected one of 1min, 5min, 15min, 30min, 60min")]
    InvalidInterval { value: String },
    #[error("invalid output size '{value}', expected compact or full")]
    InvalidOutputSize { value: String },
    #[error("invalid time period '{value}', expected one of 1h, 24h, 7d, 30d")]
    InvalidTimePeriod { value: String },

    #[error("request must include at least one symbol")]
    EmptySymbolList,
    #[error("limit must be greater than zero")]
    ZeroLimit,
    #[error("search keywords must not be empty")]
    EmptyKeywords,
}

/// Top-level error type for core operations outside the request path.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read config '{path}': {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{name}' has invalid value '{value}'")]
    InvalidEnv { name: String, value: String },
}
