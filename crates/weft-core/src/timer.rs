use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A single cancellable delayed task with explicit "already scheduled"
/// state. Used for debouncing: scheduling while a run is pending is a no-op,
/// so a burst of triggers coalesces into one execution.
#[derive(Debug, Default)]
pub struct DelayedTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run is scheduled and has not completed yet.
    pub fn is_scheduled(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Schedules `task` to run once after `delay`, unless a run is already
    /// pending. Returns whether the task was scheduled.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.handle.lock().unwrap();
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }));
        true
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
