//! Timeout-bounded HTTP execution with exponential backoff.
//!
//! Every outcome is classified once into [`FetchError`] at the transport boundary; callers
//! branch on [`FetchError::kind`] instead of inspecting messages.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::http_client::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, TransportCause, TransportError,
};
use crate::timeout::{CancelReason, CancelSignal, TimeoutController};
use crate::ValidationError;

/// Timeouts are retried on at most this many attempts, whatever `max_retries` says.
pub const TIMEOUT_RETRY_CAP: u32 = 2;

/// Immutable retry configuration for one provider client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            backoff_multiplier: 2.0,
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        timeout: Duration,
    ) -> Result<Self, ValidationError> {
        let policy = Self {
            max_retries,
            base_delay,
            backoff_multiplier,
            timeout,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay.is_zero() {
            return Err(ValidationError::InvalidRetryPolicy {
                field: "base_delay",
                reason: "must be greater than zero",
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ValidationError::InvalidRetryPolicy {
                field: "backoff_multiplier",
                reason: "must be a finite number greater than 1",
            });
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::InvalidRetryPolicy {
                field: "timeout",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Delay slept after a failed attempt `attempt_index` (0-based): `base * multiplier^n`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let seconds = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Number of attempts on which a timeout is still retried.
    pub fn timeout_retry_limit(&self) -> u32 {
        self.max_retries.min(TIMEOUT_RETRY_CAP)
    }
}

/// Bookkeeping for one network attempt.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub url: String,
    pub method: HttpMethod,
    pub started_at: Instant,
    pub timeout: Duration,
    pub attempt_index: u32,
}

impl RequestAttempt {
    fn begin(request: &HttpRequest, timeout: Duration, attempt_index: u32) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method,
            started_at: Instant::now(),
            timeout,
            attempt_index,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Discriminant of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Timeout,
    Client,
    Server,
    Cancelled,
    CircuitOpen,
    Throttled,
    Upstream,
    InvalidBody,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Client => "client",
            Self::Server => "server",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::Throttled => "throttled",
            Self::Upstream => "upstream",
            Self::InvalidBody => "invalid_body",
        }
    }
}

/// Classified failure of an upstream request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("{cause}: {message}")]
    Transport {
        cause: TransportCause,
        message: String,
    },
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("HTTP {status}: {body}")]
    Client { status: u16, body: String },
    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },
    #[error("request {reason}")]
    Cancelled { reason: CancelReason },
    #[error("service temporarily unavailable, retry in {} s", .retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },
    #[error("local request quota exhausted, retry in {} ms", .retry_in.as_millis())]
    Throttled { retry_in: Duration },
    #[error("{message}")]
    Upstream { message: String, rate_limited: bool },
    #[error("invalid response body: {message}")]
    InvalidBody { message: String },
}

impl FetchError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::Transport,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Client { .. } => FailureKind::Client,
            Self::Server { .. } => FailureKind::Server,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Throttled { .. } => FailureKind::Throttled,
            Self::Upstream { .. } => FailureKind::Upstream,
            Self::InvalidBody { .. } => FailureKind::InvalidBody,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether another attempt may help, ignoring the timeout cap applied by the executor.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Server { .. }
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::Client { status, .. } => *status == 429,
            Self::Upstream { rate_limited, .. } => *rate_limited,
            _ => false,
        }
    }

    /// Whether the failure says something about upstream health (breaker and fallback tally).
    pub const fn counts_as_upstream_failure(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::Server { .. }
            | Self::Upstream { .. }
            | Self::InvalidBody { .. } => true,
            Self::Client { status, .. } => *status == 408 || *status == 429,
            Self::Cancelled { .. } | Self::CircuitOpen { .. } | Self::Throttled { .. } => false,
        }
    }
}

/// Runs requests through per-attempt timeouts and exponential backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    http: Arc<dyn HttpClient>,
}

impl RetryExecutor {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Executes `request` until it succeeds, fails terminally, or retries are exhausted.
    pub async fn execute(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        cancel: Option<&CancelSignal>,
    ) -> Result<HttpResponse, FetchError> {
        let mut attempt_index = 0_u32;

        loop {
            let attempt = RequestAttempt::begin(request, policy.timeout, attempt_index);
            debug!(
                method = attempt.method.as_str(),
                url = %attempt.url,
                attempt = attempt.attempt_index,
                timeout_ms = u64::try_from(attempt.timeout.as_millis()).unwrap_or(u64::MAX),
                "issuing upstream request"
            );

            let error = match self.attempt(request, &attempt, cancel).await {
                Ok(response) => {
                    debug!(
                        url = %attempt.url,
                        attempt = attempt.attempt_index,
                        status = response.status,
                        elapsed_ms = attempt.elapsed_ms(),
                        "upstream request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retryable = match &error {
                FetchError::Timeout { .. } => attempt_index < policy.timeout_retry_limit(),
                other => other.is_retryable(),
            };

            if !retryable || attempt_index >= policy.max_retries {
                debug!(
                    url = %attempt.url,
                    attempt = attempt.attempt_index,
                    kind = error.kind().as_str(),
                    elapsed_ms = attempt.elapsed_ms(),
                    "giving up on upstream request"
                );
                return Err(error);
            }

            let delay = policy.delay_for_attempt(attempt_index);
            debug!(
                url = %attempt.url,
                attempt = attempt.attempt_index,
                kind = error.kind().as_str(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying upstream request after backoff"
            );
            backoff(delay, cancel).await?;
            attempt_index += 1;
        }
    }

    /// Executes `request` and parses the body as JSON, rejecting HTML and non-JSON payloads.
    pub async fn execute_json(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        cancel: Option<&CancelSignal>,
    ) -> Result<Value, FetchError> {
        let response = self.execute(request, policy, cancel).await?;
        parse_json_body(&response)
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        attempt: &RequestAttempt,
        cancel: Option<&CancelSignal>,
    ) -> Result<HttpResponse, FetchError> {
        let mut controller = TimeoutController::start(attempt.timeout, cancel);

        let outcome = tokio::select! {
            biased;
            _ = controller.signal().cancelled() => {
                Err(cancellation_error(controller.signal().reason()))
            }
            result = self.http.execute(request.clone()) => classify(result, attempt.timeout),
        };

        controller.clear();
        outcome
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").finish_non_exhaustive()
    }
}

fn classify(
    result: Result<HttpResponse, TransportError>,
    timeout: Duration,
) -> Result<HttpResponse, FetchError> {
    let response = result.map_err(|error| match error.cause() {
        TransportCause::Timeout => FetchError::Timeout {
            timeout_ms: duration_ms(timeout),
        },
        cause => FetchError::Transport {
            cause,
            message: error.message().to_owned(),
        },
    })?;

    if response.is_success() {
        Ok(response)
    } else if response.is_client_error() {
        Err(FetchError::Client {
            status: response.status,
            body: response.body,
        })
    } else if response.is_server_error() {
        Err(FetchError::Server {
            status: response.status,
            body: response.body,
        })
    } else {
        Err(FetchError::Transport {
            cause: TransportCause::Other,
            message: format!("unexpected HTTP status {}", response.status),
        })
    }
}

fn cancellation_error(reason: Option<CancelReason>) -> FetchError {
    match reason {
        Some(CancelReason::TimedOut { after }) => FetchError::Timeout {
            timeout_ms: duration_ms(after),
        },
        Some(reason) => FetchError::Cancelled { reason },
        None => FetchError::Cancelled {
            reason: CancelReason::Unspecified,
        },
    }
}

async fn backoff(delay: Duration, cancel: Option<&CancelSignal>) -> Result<(), FetchError> {
    let Some(signal) = cancel else {
        tokio::time::sleep(delay).await;
        return Ok(());
    };

    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = signal.cancelled() => Err(FetchError::Cancelled {
            reason: CancelReason::External,
        }),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parses a successful response as JSON.
///
/// Proxies sometimes answer with an HTML error page and a 200 status; that is reported
/// as [`FetchError::InvalidBody`] instead of a parse error deep in the caller.
pub fn parse_json_body(response: &HttpResponse) -> Result<Value, FetchError> {
    if let Some(content_type) = &response.content_type {
        if !content_type.to_ascii_lowercase().contains("json") {
            return Err(FetchError::InvalidBody {
                message: format!("expected a JSON response, got content type '{content_type}'"),
            });
        }
    }

    let trimmed = response.body.trim_start();
    if trimmed.starts_with('<') {
        return Err(FetchError::InvalidBody {
            message: String::from("received HTML instead of JSON"),
        });
    }

    serde_json::from_str(trimmed).map_err(|error| FetchError::InvalidBody {
        message: format!("malformed JSON: {error}"),
    })
}

/// Detects errors embedded in an otherwise successful JSON body
/// (`error`, `Error Message`, `Note`).
pub fn embedded_error(body: &Value) -> Option<FetchError> {
    if let Some(error) = body.get("error").filter(|value| !value.is_null()) {
        let message = match error {
            Value::String(text) => text.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| other.to_string()),
        };
        let rate_limited = mentions_rate_limit(&message);
        return Some(FetchError::Upstream {
            message,
            rate_limited,
        });
    }

    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Some(FetchError::Upstream {
            message: message.to_owned(),
            rate_limited: false,
        });
    }

    body.get("Note")
        .and_then(Value::as_str)
        .map(|message| FetchError::Upstream {
            message: message.to_owned(),
            rate_limited: true,
        })
}

pub(crate) fn mentions_rate_limit(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("rate limit") || lowered.contains("too many requests")
}
