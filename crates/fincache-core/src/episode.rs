//! Keep-alive for fire-and-forget work started while handling an event.
//!
//! A handler may return its result before background work (such as a
//! stale-while-revalidate refresh) has finished. That work is registered on
//! the event's `Episode`; the host must `settle` the episode before it treats
//! the event as complete, otherwise the work may be dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle to the background work of one handling episode.
/// Clone is cheap; every clone registers into the same episode.
#[derive(Clone, Default)]
pub struct Episode {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Episode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and keep the episode open until it finishes.
    pub async fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.tasks.lock().await.push(handle);
    }

    /// Number of registered tasks not yet collected by `settle`.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for all registered work, giving up after `timeout`.
    ///
    /// Returns how many tasks ran to completion. Tasks still running at the
    /// timeout are left detached; panicked tasks are logged.
    pub async fn settle(&self, timeout: Duration) -> usize {
        let mut settled = 0;
        // Work may register more work, so drain until nothing new arrives
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
            if handles.is_empty() {
                return settled;
            }

            let count = handles.len();
            match tokio::time::timeout(timeout, join_all(handles)).await {
                Ok(results) => {
                    for result in results {
                        match result {
                            Ok(()) => settled += 1,
                            Err(e) => error!(error = %e, "Episode task failed"),
                        }
                    }
                    debug!(count = count, "Episode tasks settled");
                }
                Err(_) => {
                    warn!(count = count, timeout_secs = timeout.as_secs(), "Episode timed out with work still running");
                    return settled;
                }
            }
        }
    }
}
