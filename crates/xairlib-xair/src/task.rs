//! Cancellable background tasks.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned background loop plus the token that stops it.
///
/// Returned by [`DeviceScanner::spawn`](crate::scanner::DeviceScanner::spawn)
/// and [`FleetManager::spawn`](crate::manager::FleetManager::spawn). Dropping
/// the handle does not stop the task; call [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct TaskHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `run(token)` on the current runtime.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(cancel.clone()));
        Self { cancel, task }
    }

    /// A clone of the token, for tying other work to this task's lifetime.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the task has already returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task and wait for it to unwind.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
}
