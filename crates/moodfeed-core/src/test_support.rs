use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::http_client::{HttpClient, HttpRequest, HttpResponse, TransportFuture};

/// Replays canned responses and records every request it receives.
pub(crate) struct RecordingHttpClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingHttpClient {
    pub(crate) fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn json(body: serde_json::Value) -> Arc<Self> {
        Self::new(vec![HttpResponse::ok_json(body.to_string())])
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn last_url(&self) -> String {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(HttpRequest::full_url)
            .unwrap_or_default()
    }
}

impl HttpClient for RecordingHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(503, "no scripted response")))
        })
    }
}
