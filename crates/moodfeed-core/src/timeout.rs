//! Deadline-bound cancellation for a single upstream attempt.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a [`CancelSignal`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The attempt deadline elapsed.
    TimedOut { after: Duration },
    /// A linked caller signal fired.
    External,
    /// Cancelled without a reason.
    Unspecified,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut { after } => write!(f, "timed out after {} ms", after.as_millis()),
            Self::External => f.write_str("cancelled by caller"),
            Self::Unspecified => f.write_str("cancelled (no reason given)"),
        }
    }
}

/// Cloneable cancellation handle carrying the reason it fired.
///
/// The first reason recorded wins. Cancelling an already-cancelled signal is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Unspecified);
    }

    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        // Reason is stored before waking waiters so they always observe it.
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once the signal has fired.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Produces a [`CancelSignal`] that fires on a deadline or when a linked caller signal fires.
///
/// A zero timeout never auto-fires. Outside a Tokio runtime no watcher is started and the
/// signal only fires through an explicit cancel.
#[derive(Debug)]
pub struct TimeoutController {
    signal: CancelSignal,
    watcher: Option<JoinHandle<()>>,
}

impl TimeoutController {
    pub fn start(timeout: Duration, external: Option<&CancelSignal>) -> Self {
        let signal = CancelSignal::new();

        if external.is_some_and(CancelSignal::is_cancelled) {
            signal.cancel_with(CancelReason::External);
            return Self {
                signal,
                watcher: None,
            };
        }

        if timeout.is_zero() && external.is_none() {
            return Self {
                signal,
                watcher: None,
            };
        }

        let watcher = Handle::try_current().ok().map(|handle| {
            handle.spawn(watch(signal.clone(), timeout, external.cloned()))
        });

        Self { signal, watcher }
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Stops the watcher so nothing fires after the attempt settled. Idempotent.
    pub fn clear(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn watch(signal: CancelSignal, timeout: Duration, external: Option<CancelSignal>) {
    let deadline = async {
        if timeout.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(timeout).await;
        }
    };
    let parent = async {
        match &external {
            Some(parent) => parent.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = deadline => signal.cancel_with(CancelReason::TimedOut { after: timeout }),
        _ = parent => signal.cancel_with(CancelReason::External),
        _ = signal.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fires_with_timed_out_reason_after_deadline() {
        let started = Instant::now();
        let controller = TimeoutController::start(Duration::from_millis(100), None);

        controller.signal().cancelled().await;

        assert_eq!(
            controller.signal().reason(),
            Some(CancelReason::TimedOut {
                after: Duration::from_millis(100)
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn linked_signal_fires_as_external() {
        let caller = CancelSignal::new();
        let controller = TimeoutController::start(Duration::from_secs(10), Some(&caller));

        caller.cancel();
        controller.signal().cancelled().await;

        assert_eq!(controller.signal().reason(), Some(CancelReason::External));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_caller_fires_immediately() {
        let caller = CancelSignal::new();
        caller.cancel();

        let controller = TimeoutController::start(Duration::from_secs(10), Some(&caller));

        assert!(controller.signal().is_cancelled());
        assert_eq!(controller.signal().reason(), Some(CancelReason::External));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_fires() {
        let controller = TimeoutController::start(Duration::ZERO, None);

        let waited =
            tokio::time::timeout(Duration::from_secs(3600), controller.signal().cancelled()).await;

        assert!(waited.is_err());
        assert!(!controller.signal().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_prevents_late_firing() {
        let mut controller = TimeoutController::start(Duration::from_millis(50), None);
        controller.clear();
        controller.clear();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!controller.signal().is_cancelled());
    }

    #[test]
    fn double_cancel_keeps_first_reason() {
        let signal = CancelSignal::new();
        signal.cancel_with(CancelReason::External);
        signal.cancel();

        assert_eq!(signal.reason(), Some(CancelReason::External));
        assert_eq!(CancelReason::Unspecified.to_string(), "cancelled (no reason given)");
    }
}
