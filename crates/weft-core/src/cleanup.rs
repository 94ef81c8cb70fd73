use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weft_intent::{
    DynIntentStore, Intent, IntentData, IntentEvent, IntentEventKind, IntentKey, IntentState,
    RequestKind,
};

/// Receiver of the cleanup loop's resubmissions; implemented by the manager,
/// mirroring its public request surface.
pub trait RetryDelegate: Send + Sync {
    fn submit(&self, intent: Intent);
    fn withdraw(&self, intent: Intent);
    fn purge(&self, key: IntentKey);
}

/// Periodic self-healing loop over the intent store.
///
/// Two paths with deliberately different rules. The reactive path answers
/// CORRUPT lifecycle events and gives up once the record's error count
/// reaches the retry threshold. The periodic sweep resubmits FAILED and
/// CORRUPT records and anything stuck mid-transition past the sweep period,
/// with no error-count bound: a record that exhausted its reactive retries
/// is still retried, just at the slower cadence.
pub struct IntentCleanup {
    store: DynIntentStore,
    period: Duration,
    retry_threshold: u32,
    delegate: RwLock<Option<Arc<dyn RetryDelegate>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntentCleanup {
    pub fn new(store: DynIntentStore, period: Duration, retry_threshold: u32) -> Self {
        Self {
            store,
            period,
            retry_threshold,
            delegate: RwLock::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn set_delegate(&self, delegate: Arc<dyn RetryDelegate>) {
        *self.delegate.write().unwrap() = Some(delegate);
    }

    /// Starts the periodic sweep. Idempotent; a running sweep is kept.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let cleanup = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cleanup.sweep_once();
            }
        }));
        info!(period = ?self.period, "intent cleanup started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// One pass over current and pending records older than the period.
    pub fn sweep_once(&self) {
        let mut resubmitted = 0usize;
        for data in self.store.intent_data(true, self.period) {
            if !self.store.is_master(&data.key) {
                continue;
            }
            match data.state {
                IntentState::Failed | IntentState::Corrupt => {
                    self.resubmit(&data);
                    resubmitted += 1;
                }
                state if state.is_stuck() => {
                    warn!(key = %data.key, ?state, age = ?data.age(), "intent stuck mid-transition, resubmitting");
                    self.resubmit(&data);
                    resubmitted += 1;
                }
                _ => {}
            }
        }
        for data in self.store.pending_data(self.period) {
            if !self.store.is_master(&data.key) {
                continue;
            }
            debug!(key = %data.key, request = ?data.request, "re-enqueueing stale pending request");
            self.resubmit(&data);
            resubmitted += 1;
        }
        if resubmitted > 0 {
            info!(count = resubmitted, "cleanup sweep resubmitted intents");
        }
    }

    /// Reactive path: retries a freshly corrupted intent until the error
    /// count reaches the threshold, then leaves it to the periodic sweep.
    pub fn handle_event(&self, event: &IntentEvent) {
        if event.kind != IntentEventKind::Corrupt {
            return;
        }
        if !self.store.is_master(&event.key) {
            return;
        }
        let Some(data) = self.store.get(&event.key) else {
            return;
        };
        if data.error_count >= self.retry_threshold {
            warn!(
                key = %data.key,
                errors = data.error_count,
                "retry threshold reached, deferring to periodic sweep"
            );
            return;
        }
        self.resubmit(&data);
    }

    fn resubmit(&self, data: &IntentData) {
        let Some(delegate) = self.delegate.read().unwrap().clone() else {
            return;
        };
        match data.request {
            RequestKind::Install => delegate.submit(data.intent.clone()),
            RequestKind::Withdraw => delegate.withdraw(data.intent.clone()),
            RequestKind::Purge => delegate.purge(data.key.clone()),
        }
    }
}

impl Drop for IntentCleanup {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
