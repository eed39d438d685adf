use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

/// Completion tracker for the tasks serving connections. Cloning is cheap and every clone tracks
/// the same set of tasks.
#[derive(Clone, Debug, Default)]
pub struct Wait {
    tracker: TaskTracker,
}

impl Wait {
    pub fn new() -> Wait {
        Wait {
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns `task` on the runtime and tracks it until it finishes.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Registers one unit of work that completes when the returned token is dropped.
    pub fn token(&self) -> TaskTrackerToken {
        self.tracker.token()
    }

    /// Number of registered units that have not completed yet.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Resolves once every registered unit has completed. Work may still be registered
    /// afterwards and is waited for by later calls.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Like `wait`, but gives up after `timeout`. Returns true when the deadline was hit. Nothing
    /// is cancelled, the tracked tasks keep running.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        self.tracker.close();
        time::timeout(timeout, self.tracker.wait()).await.is_err()
    }
}
