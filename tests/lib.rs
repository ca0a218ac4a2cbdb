//! Shared fixtures for the behavior tests: a scripted transport with a call counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use moodfeed_core::{
    HttpClient, HttpRequest, HttpResponse, ProviderPolicy, RetryPolicy, TransportError,
};
use moodfeed_core::http_client::TransportFuture;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never answers; only the caller's timeout ends the attempt.
    Hang,
}

impl Step {
    pub fn json(body: serde_json::Value) -> Self {
        Self::Respond(HttpResponse::ok_json(body.to_string()))
    }

    pub fn status(status: u16) -> Self {
        Self::Respond(HttpResponse::new(status, format!("status {status}")))
    }
}

/// Transport that replays `steps` in order, then repeats `then` forever.
pub struct ScriptedHttpClient {
    steps: Mutex<VecDeque<Step>>,
    then: Step,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new(steps: Vec<Step>, then: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            then,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with `step`.
    pub fn always(step: Step) -> Arc<Self> {
        Self::new(Vec::new(), step)
    }

    /// Number of requests that reached the transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(HttpRequest::full_url)
            .collect()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.then.clone());
            match step {
                Step::Respond(response) => Ok(response),
                Step::Fail(error) => Err(error),
                Step::Hang => std::future::pending().await,
            }
        })
    }
}

/// Fast policy for tests: 10 ms base delay doubling, 100 ms timeout.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        timeout: Duration::from_millis(100),
    }
}

/// Polygon's policy with the fast retry settings.
pub fn fast_polygon_policy(max_retries: u32) -> ProviderPolicy {
    ProviderPolicy {
        retry: fast_retry(max_retries),
        ..ProviderPolicy::polygon_default()
    }
}
