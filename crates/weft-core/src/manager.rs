use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use weft_intent::{
    DynIntentStore, Intent, IntentData, IntentEvent, IntentKey, IntentKind, IntentState,
    RequestKind,
};
use weft_net::TopologyEvent;

use crate::accumulator::Accumulator;
use crate::cleanup::{IntentCleanup, RetryDelegate};
use crate::compile::{CompilerRegistry, IntentCompiler};
use crate::config::CoreConfig;
use crate::coordinator::InstallCoordinator;
use crate::install::{InstallerRegistry, IntentInstaller};
use crate::phase::{PhaseMachine, PhaseOutcome};
use crate::tracker::{ObjectiveTracker, TopologyDelegate};

/// Observer of intent lifecycle events. Callbacks run on the batch task;
/// implementations must not block.
pub trait IntentListener: Send + Sync {
    fn on_event(&self, event: &IntentEvent);
}

/// Front door of the framework.
///
/// Requests are enqueued as pending records and funneled through a keyed
/// accumulator, so a burst of updates to one key collapses into a single
/// processing round. Each flushed batch is processed on a bounded worker
/// pool: per intent, the phase machine compiles the request, the
/// coordinator runs the device transaction, and the batch's terminal
/// records land in the store as one ordered write before events fan out to
/// the tracker, the cleanup loop and registered listeners.
pub struct IntentManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoreConfig,
    store: DynIntentStore,
    compilers: Arc<CompilerRegistry>,
    installers: Arc<InstallerRegistry>,
    coordinator: InstallCoordinator,
    tracker: ObjectiveTracker,
    cleanup: Arc<IntentCleanup>,
    accumulator: Accumulator<IntentData>,
    listeners: RwLock<Vec<Arc<dyn IntentListener>>>,
    workers: Arc<Semaphore>,
}

impl IntentManager {
    /// Builds and starts the framework over `store`. Must be called inside
    /// a tokio runtime. Compilers and installers are registered afterwards.
    pub fn new(config: CoreConfig, store: DynIntentStore) -> Self {
        let compilers = Arc::new(CompilerRegistry::new());
        let installers = Arc::new(InstallerRegistry::new());
        let coordinator = InstallCoordinator::new(installers.clone());
        let tracker = ObjectiveTracker::new(&config, store.clone());
        let cleanup = Arc::new(IntentCleanup::new(
            store.clone(),
            config.cleanup_period,
            config.retry_threshold,
        ));
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));

        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<Vec<IntentData>>();
        let accumulator = Accumulator::new(
            config.accumulator.clone(),
            reduce_by_key,
            move |batch| {
                let _ = batch_tx.send(batch);
            },
        );

        let inner = Arc::new(Inner {
            config,
            store,
            compilers,
            installers,
            coordinator,
            tracker,
            cleanup,
            accumulator,
            listeners: RwLock::new(Vec::new()),
            workers,
        });

        let weak = Arc::downgrade(&inner);
        inner
            .tracker
            .set_delegate(Arc::new(TrackerDelegate(weak.clone())));
        inner
            .cleanup
            .set_delegate(Arc::new(CleanupDelegate(weak.clone())));
        inner.cleanup.start();
        tokio::spawn(run_batches(weak, batch_rx));

        info!(workers = inner.config.worker_pool_size, "intent manager started");
        Self { inner }
    }

    /// Requests installation (or reinstallation) of `intent`.
    pub fn submit(&self, intent: Intent) {
        self.inner.submit(intent);
    }

    /// Requests withdrawal of whatever `intent`'s key has installed.
    pub fn withdraw(&self, intent: Intent) {
        self.inner.withdraw(intent);
    }

    /// Requests removal of the record for `key`, withdrawing first if
    /// anything is installed. Unknown keys are ignored.
    pub fn purge(&self, key: &IntentKey) {
        self.inner.purge(key.clone());
    }

    pub fn register_compiler(&self, kind: IntentKind, compiler: Arc<dyn IntentCompiler>) {
        self.inner.compilers.register(kind, compiler);
    }

    pub fn unregister_compiler(&self, kind: IntentKind) {
        self.inner.compilers.unregister(kind);
    }

    pub fn register_installer(&self, kind: IntentKind, installer: Arc<dyn IntentInstaller>) {
        self.inner.installers.register(kind, installer);
    }

    pub fn unregister_installer(&self, kind: IntentKind) {
        self.inner.installers.unregister(kind);
    }

    pub fn add_listener(&self, listener: Arc<dyn IntentListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    /// Feeds one topology event into the objective tracker.
    pub fn handle_topology_event(&self, event: &TopologyEvent) {
        self.inner.tracker.handle_event(event);
    }

    pub fn get(&self, key: &IntentKey) -> Option<IntentData> {
        self.inner.store.get(key)
    }

    /// All current records, transient states included.
    pub fn intents(&self) -> Vec<IntentData> {
        self.inner.store.intent_data(true, Duration::ZERO)
    }

    /// Stops the cleanup loop and refuses further batch work. In-flight
    /// device transactions run to completion.
    pub fn shutdown(&self) {
        self.inner.cleanup.stop();
        self.inner.workers.close();
        info!("intent manager stopped");
    }
}

/// Last write wins per key, in first-arrival order.
fn reduce_by_key(batch: Vec<IntentData>) -> Vec<IntentData> {
    let mut by_key: IndexMap<IntentKey, IntentData> = IndexMap::new();
    for data in batch {
        by_key.insert(data.key.clone(), data);
    }
    by_key.into_values().collect()
}

async fn run_batches(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Vec<IntentData>>) {
    while let Some(batch) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        inner.process_batch(batch).await;
    }
}

impl Inner {
    fn submit(&self, intent: Intent) {
        self.enqueue(IntentData::install(intent));
    }

    fn withdraw(&self, intent: Intent) {
        self.enqueue(IntentData::withdraw(intent));
    }

    fn purge(&self, key: IntentKey) {
        match self.store.get(&key) {
            Some(current) => self.enqueue(IntentData::purge(current.intent)),
            None => debug!(key = %key, "purge of unknown key ignored"),
        }
    }

    fn enqueue(&self, data: IntentData) {
        match self.store.add_pending(data.clone()) {
            Ok(Some(event)) => self.post_event(&event),
            Ok(None) => {}
            Err(err) => {
                warn!(key = %data.key, error = %err, "failed to enqueue request");
                return;
            }
        }
        self.accumulator.add(data);
    }

    async fn process_batch(self: &Arc<Self>, batch: Vec<IntentData>) {
        let mut handles = Vec::with_capacity(batch.len());
        for pending in batch {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                // Shutdown.
                Err(_) => return,
            };
            let inner = self.clone();
            handles.push(tokio::spawn(async move {
                let out = inner.process_one(pending).await;
                drop(permit);
                out
            }));
        }

        let mut writes: Vec<IntentData> = Vec::new();
        let mut purges: Vec<IntentKey> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((w, p)) => {
                    writes.extend(w);
                    purges.extend(p);
                }
                Err(err) => error!(error = %err, "intent processing task panicked"),
            }
        }

        match self.store.batch_write(writes.clone()) {
            Ok(events) => {
                for data in &writes {
                    self.tracker.track_intent(data);
                }
                for event in events {
                    self.post_event(&event);
                }
            }
            Err(err) => error!(error = %err, "failed to write processed batch"),
        }

        for key in purges {
            if self.store.remove(&key).is_some() {
                self.tracker.untrack(&key);
                self.post_event(&IntentEvent::purged(key));
            }
        }
    }

    /// Drives one pending request to its terminal records. Returns the
    /// records to write and the keys to remove.
    async fn process_one(&self, mut pending: IntentData) -> (Vec<IntentData>, Vec<IntentKey>) {
        if !self.store.is_master(&pending.key) {
            debug!(key = %pending.key, "not authoritative for key, skipping");
            return (Vec::new(), Vec::new());
        }
        let current = self.store.get(&pending.key);
        if let Some(current) = &current {
            // The retry budget lives on the stored record, not the request.
            pending.error_count = current.error_count;
        }

        match PhaseMachine::new(&self.compilers, &self.installers).run(pending, current) {
            PhaseOutcome::Write(data) => (vec![data], Vec::new()),
            PhaseOutcome::Purge(key) => (Vec::new(), vec![key]),
            PhaseOutcome::Coordinate {
                to_uninstall,
                to_install,
            } => {
                // Make the in-flight state visible before touching devices,
                // so observers and the cleanup sweep can see it.
                if let Some(transient) = to_install.as_ref().or(to_uninstall.as_ref()) {
                    if let Err(err) = self.store.write(transient.clone()) {
                        warn!(key = %transient.key, error = %err, "failed to record in-flight state");
                    }
                }
                let mut writes = self
                    .coordinator
                    .install_intents(to_uninstall, to_install)
                    .await;

                // A purge that needed a withdrawal first finishes as a
                // removal once the withdrawal settled clean.
                let mut purges = Vec::new();
                writes.retain(|data| {
                    if data.request == RequestKind::Purge && data.state == IntentState::Withdrawn {
                        purges.push(data.key.clone());
                        false
                    } else {
                        true
                    }
                });
                (writes, purges)
            }
        }
    }

    /// Resubmits the named intents, plus, with `compile_all_failed`,
    /// everything a topology improvement might un-strand: records waiting
    /// on a recompilation and kinds that tolerate partial failure.
    fn trigger_compile(&self, keys: HashSet<IntentKey>, compile_all_failed: bool) {
        let mut seen: HashSet<IntentKey> = HashSet::new();
        let mut targets: Vec<IntentData> = Vec::new();
        for key in keys {
            if let Some(data) = self.store.get(&key) {
                if seen.insert(key) {
                    targets.push(data);
                }
            }
        }
        if compile_all_failed {
            for data in self.store.intent_data(true, Duration::ZERO) {
                let wants = data.state.needs_recompile()
                    || data.intent.kind.tolerates_partial_failure();
                if wants && !data.state.is_stuck() && seen.insert(data.key.clone()) {
                    targets.push(data);
                }
            }
        }

        let mut resubmitted = 0usize;
        for data in targets {
            if !self.store.is_master(&data.key) {
                continue;
            }
            match data.request {
                RequestKind::Install => self.submit(data.intent),
                RequestKind::Withdraw => self.withdraw(data.intent),
                RequestKind::Purge => self.purge(data.key),
            }
            resubmitted += 1;
        }
        if resubmitted > 0 {
            debug!(count = resubmitted, compile_all_failed, "topology change triggered recompilation");
        }
    }

    fn post_event(&self, event: &IntentEvent) {
        self.cleanup.handle_event(event);
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_event(event);
        }
    }
}

/// Weak bridge from the tracker back into the manager.
struct TrackerDelegate(Weak<Inner>);

impl TopologyDelegate for TrackerDelegate {
    fn trigger_compile(&self, keys: HashSet<IntentKey>, compile_all_failed: bool) {
        if let Some(inner) = self.0.upgrade() {
            inner.trigger_compile(keys, compile_all_failed);
        }
    }
}

/// Weak bridge from the cleanup loop back into the manager.
struct CleanupDelegate(Weak<Inner>);

impl RetryDelegate for CleanupDelegate {
    fn submit(&self, intent: Intent) {
        if let Some(inner) = self.0.upgrade() {
            inner.submit(intent);
        }
    }

    fn withdraw(&self, intent: Intent) {
        if let Some(inner) = self.0.upgrade() {
            inner.withdraw(intent);
        }
    }

    fn purge(&self, key: IntentKey) {
        if let Some(inner) = self.0.upgrade() {
            inner.purge(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_intent::ApplicationId;

    fn data(key: &str, at: u64) -> IntentData {
        let mut data = IntentData::install(
            Intent::builder(
                IntentKey::new(key),
                ApplicationId::new("app"),
                IntentKind::PointToPoint,
            )
            .build(),
        );
        data.updated_at_ms = at;
        data
    }

    #[test]
    fn reduce_keeps_the_last_write_per_key() {
        let reduced = reduce_by_key(vec![data("a", 1), data("b", 2), data("a", 3)]);
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].key, IntentKey::new("a"));
        assert_eq!(reduced[0].updated_at_ms, 3);
        assert_eq!(reduced[1].key, IntentKey::new("b"));
    }
}
