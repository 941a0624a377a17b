//! Cancellable background tasks owned by a strategy

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::ActivationError;

/// A spawned task paired with the token that stops it.
#[derive(Debug)]
pub(crate) struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `task` on the current runtime. The task is expected to exit
    /// promptly once `token` is cancelled.
    pub(crate) fn spawn<F>(
        name: &'static str,
        token: CancellationToken,
        task: F,
    ) -> Result<Self, ActivationError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| ActivationError::Scheduling(format!("{name}: {e}")))?;

        debug!("Spawning {} task", name);
        let handle = runtime.spawn(task);

        Ok(Self {
            name,
            token,
            handle,
        })
    }

    /// Cancel the task and wait up to `timeout` for it to finish, aborting it
    /// if it does not. Never fails.
    pub(crate) async fn stop(self, timeout: Duration) {
        self.token.cancel();
        let abort_handle = self.handle.abort_handle();

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => debug!("{} task stopped", self.name),
            Ok(Err(e)) if e.is_cancelled() => debug!("{} task was cancelled", self.name),
            Ok(Err(e)) => error!("{} task panicked: {}", self.name, e),
            Err(_) => {
                warn!(
                    "{} task did not stop within {:?}, aborting",
                    self.name, timeout
                );
                abort_handle.abort();
            }
        }
    }
}
