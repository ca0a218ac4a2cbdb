//! Behavior tests for per-provider circuit breaking.

use std::sync::Arc;
use std::time::Duration;

use moodfeed_core::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureKind, FallbackService, HttpAuth,
    ProviderCall, ProviderClient,
};
use moodfeed_tests::{fast_polygon_policy, ScriptedHttpClient, Step};
use serde_json::{json, Value};

fn tickers_call() -> ProviderCall {
    ProviderCall::new("/tickers", Duration::from_secs(60), |_| json!({"results": []}))
}

fn polygon_client(http: Arc<ScriptedHttpClient>, max_retries: u32) -> ProviderClient {
    ProviderClient::new(
        fast_polygon_policy(max_retries),
        "http://proxy.test/api/proxy/polygon",
        HttpAuth::None,
        http,
        Arc::new(FallbackService::default()),
    )
}

// =============================================================================
// Circuit breaker: opening
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_five_calls_fail_the_last_two_short_circuit_without_network() {
    // Given: a provider whose transport always fails, breaker threshold 3, no retries
    let http = ScriptedHttpClient::always(Step::status(503));
    let client = polygon_client(http.clone(), 0);
    assert_eq!(client.policy().breaker.failure_threshold, 3);

    // When: five consecutive calls are made
    let mut kinds = Vec::new();
    for _ in 0..5 {
        let error = client.fetch(tickers_call()).await.expect_err("all calls fail");
        kinds.push(error.error.kind());
    }

    // Then: three reached the network, the 4th and 5th failed fast
    assert_eq!(
        kinds,
        vec![
            FailureKind::Server,
            FailureKind::Server,
            FailureKind::Server,
            FailureKind::CircuitOpen,
            FailureKind::CircuitOpen,
        ]
    );
    assert_eq!(http.calls(), 3);
    assert_eq!(client.breaker().state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn when_retries_exhaust_one_call_counts_as_one_breaker_failure() {
    // Given: a client with three retries per call
    let http = ScriptedHttpClient::always(Step::status(502));
    let client = polygon_client(http.clone(), 3);

    // When: one call fails after its retries
    let error = client.fetch(tickers_call()).await.expect_err("fails");

    // Then: four attempts were made but the breaker saw a single failure
    assert_eq!(error.error.kind(), FailureKind::Server);
    assert_eq!(http.calls(), 4);
    assert_eq!(client.breaker().failure_count(), 1);
    assert_eq!(client.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn when_caller_error_occurs_breaker_is_not_charged() {
    // Given: a transport answering 404
    let http = ScriptedHttpClient::always(Step::status(404));
    let client = polygon_client(http.clone(), 3);

    // When: several calls fail with a client error
    for _ in 0..5 {
        let error = client.fetch(tickers_call()).await.expect_err("404");
        assert_eq!(error.error.status(), Some(404));
    }

    // Then: every call reached the network and the breaker stayed closed
    assert_eq!(http.calls(), 5);
    assert_eq!(client.breaker().state(), CircuitState::Closed);
    assert_eq!(client.breaker().failure_count(), 0);
}

// =============================================================================
// Circuit breaker: recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_cooldown_elapses_next_call_goes_through_and_closes_circuit() {
    // Given: a breaker opened by three failures, then a healthy transport
    let http = ScriptedHttpClient::new(
        vec![Step::status(503), Step::status(503), Step::status(503)],
        Step::json(json!({"status": "OK", "results": [{"ticker": "AAPL"}]})),
    );
    let client = polygon_client(http.clone(), 0);
    for _ in 0..3 {
        let _ = client.fetch(tickers_call()).await;
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);

    // When: the 60 s cooldown elapses
    tokio::time::advance(Duration::from_secs(61)).await;
    let fetched = client.fetch(tickers_call()).await.expect("allowed through");

    // Then: the live answer is returned and the circuit is closed again
    assert!(fetched.is_live());
    assert_eq!(fetched.data()["results"][0]["ticker"], json!("AAPL"));
    assert_eq!(http.calls(), 4);
    let snapshot = client.status().circuit;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn when_breaker_is_reset_manually_calls_resume_immediately() {
    // Given: an open circuit
    let http = ScriptedHttpClient::new(
        vec![Step::status(503), Step::status(503), Step::status(503)],
        Step::json(json!({"results": []})),
    );
    let client = polygon_client(http.clone(), 0);
    for _ in 0..3 {
        let _ = client.fetch(tickers_call()).await;
    }

    // When: the operator resets the breaker
    client.reset_circuit_breaker();

    // Then: the next call reaches the network without waiting for the cooldown
    let fetched: Value = client
        .fetch(tickers_call())
        .await
        .expect("reset breaker lets calls through")
        .into_data();
    assert_eq!(fetched, json!({"results": []}));
    assert_eq!(http.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn when_breaker_used_directly_open_state_expires_lazily() {
    // Given: a standalone breaker with threshold 2 and a 5 s cooldown
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new(2, Duration::from_secs(5)).expect("valid config"),
    );

    // When: two failures are recorded
    assert!(!breaker.record_failure());
    assert!(breaker.record_failure());

    // Then: calls are refused until the cooldown passes, then allowed
    assert!(!breaker.allow_request());
    assert_eq!(breaker.retry_in(), Some(Duration::from_secs(5)));
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(breaker.allow_request());
    assert_eq!(breaker.state(), CircuitState::Closed);
}
