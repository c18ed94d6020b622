use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ProbeError;

/// Deadline and cancellation signal for one probe invocation.
///
/// Every suspension point of a prober goes through [`ProbeContext::run`],
/// so neither an expired deadline nor a cancellation can be swallowed by a
/// blocked read, dial or handshake.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    timeout: Duration,
    deadline: Instant,
    cancelled: watch::Receiver<bool>,
}

/// Cancels the [`ProbeContext`] it was created with, and all of its clones.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl ProbeContext {
    /// A context that expires `timeout` from now and cannot be cancelled.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_cancel(timeout).0
    }

    pub fn with_cancel(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = ProbeContext {
            timeout,
            deadline: Instant::now() + timeout,
            cancelled: rx,
        };
        (ctx, CancelHandle(tx))
    }

    /// Drives `fut` until it completes, the deadline passes, or the context
    /// is cancelled, whichever comes first. The future is dropped on abort.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ProbeError> {
        let mut cancelled = self.cancelled.clone();
        let cancel = async move {
            // A dropped handle can never cancel, so park instead of erroring.
            if cancelled.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            _ = cancel => Err(ProbeError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ProbeError::DeadlineExceeded(self.timeout)),
            out = fut => Ok(out),
        }
    }
}
