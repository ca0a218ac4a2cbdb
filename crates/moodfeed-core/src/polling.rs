//! Periodic refresh with deterministic cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawns polling loops.
pub struct PollingTask;

impl PollingTask {
    /// Runs `job` immediately and then every `period` until the handle is cancelled or dropped.
    ///
    /// A run in progress is not interrupted; no further run starts after cancellation.
    pub fn spawn<F, Fut>(period: Duration, mut job: F) -> PollingHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if child.is_cancelled() {
                    break;
                }
                job().await;
            }
            debug!("polling loop stopped");
        });

        PollingHandle {
            token,
            task: Some(task),
        }
    }
}

/// Owner of a running polling loop.
#[derive(Debug)]
pub struct PollingHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    /// Stops future runs. Safe to call more than once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels and waits for the loop to finish its current run.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
