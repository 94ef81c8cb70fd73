use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, trace};
use weft_intent::{DynIntentStore, IntentData, IntentKey, IntentState};
use weft_net::{LinkKey, NetworkResource, TopologyEvent};

use crate::accumulator::Accumulator;
use crate::config::CoreConfig;
use crate::timer::DelayedTask;

/// Receiver of the tracker's recompilation requests. `keys` names the
/// intents to recompile; with `compile_all_failed` the receiver additionally
/// sweeps the store for anything a topology improvement might un-strand.
pub trait TopologyDelegate: Send + Sync {
    fn trigger_compile(&self, keys: HashSet<IntentKey>, compile_all_failed: bool);
}

/// Reverse index from topology resources to the intents depending on them.
///
/// Installed (and installing) intents are registered against every resource
/// their user intent and compiled leaves mention. Topology events that break
/// existing state are funneled through a keyed accumulator and answered with
/// a targeted recompilation of the affected intents; events that add
/// capacity debounce into one full sweep instead, since the index cannot
/// know which stranded intents new capacity helps.
pub struct ObjectiveTracker {
    inner: Arc<TrackerInner>,
    store: DynIntentStore,
    work: Accumulator<NetworkResource>,
    recompile_all: Arc<DelayedTask>,
    recompile_delay: Duration,
}

#[derive(Default)]
struct TrackerInner {
    links: RwLock<HashMap<LinkKey, HashSet<IntentKey>>>,
    elements: RwLock<HashMap<NetworkResource, HashSet<IntentKey>>>,
    /// What each key is currently registered against, for clean removal.
    registered: RwLock<HashMap<IntentKey, HashSet<NetworkResource>>>,
    delegate: RwLock<Option<Arc<dyn TopologyDelegate>>>,
}

impl TrackerInner {
    fn keys_for(&self, resource: &NetworkResource) -> HashSet<IntentKey> {
        match resource {
            NetworkResource::Link(key) => self
                .links
                .read()
                .unwrap()
                .get(key)
                .cloned()
                .unwrap_or_default(),
            other => self
                .elements
                .read()
                .unwrap()
                .get(other)
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn add(&self, key: &IntentKey, resources: HashSet<NetworkResource>) {
        self.remove(key);
        for resource in &resources {
            match resource {
                NetworkResource::Link(link) => {
                    self.links
                        .write()
                        .unwrap()
                        .entry(link.clone())
                        .or_default()
                        .insert(key.clone());
                }
                other => {
                    self.elements
                        .write()
                        .unwrap()
                        .entry(other.clone())
                        .or_default()
                        .insert(key.clone());
                }
            }
        }
        if !resources.is_empty() {
            self.registered
                .write()
                .unwrap()
                .insert(key.clone(), resources);
        }
    }

    fn remove(&self, key: &IntentKey) {
        let Some(resources) = self.registered.write().unwrap().remove(key) else {
            return;
        };
        for resource in resources {
            match resource {
                NetworkResource::Link(link) => {
                    let mut links = self.links.write().unwrap();
                    if let Some(keys) = links.get_mut(&link) {
                        keys.remove(key);
                        if keys.is_empty() {
                            links.remove(&link);
                        }
                    }
                }
                other => {
                    let mut elements = self.elements.write().unwrap();
                    if let Some(keys) = elements.get_mut(&other) {
                        keys.remove(key);
                        if keys.is_empty() {
                            elements.remove(&other);
                        }
                    }
                }
            }
        }
    }

    fn trigger(&self, keys: HashSet<IntentKey>, compile_all_failed: bool) {
        if let Some(delegate) = self.delegate.read().unwrap().clone() {
            delegate.trigger_compile(keys, compile_all_failed);
        }
    }
}

impl ObjectiveTracker {
    /// Must be created inside a tokio runtime.
    pub fn new(config: &CoreConfig, store: DynIntentStore) -> Self {
        let inner = Arc::new(TrackerInner::default());

        let for_deliver = inner.clone();
        let work = Accumulator::new(
            config.tracker_accumulator.clone(),
            |resources: Vec<NetworkResource>| {
                let mut seen = indexmap::IndexSet::new();
                seen.extend(resources);
                seen.into_iter().collect()
            },
            move |resources| {
                let mut keys = HashSet::new();
                for resource in &resources {
                    keys.extend(for_deliver.keys_for(resource));
                }
                if keys.is_empty() {
                    trace!(resources = resources.len(), "no intents tracked against affected resources");
                    return;
                }
                debug!(intents = keys.len(), resources = resources.len(), "targeted recompilation");
                for_deliver.trigger(keys, false);
            },
        );

        Self {
            inner,
            store,
            work,
            recompile_all: Arc::new(DelayedTask::new()),
            recompile_delay: config.recompile_delay,
        }
    }

    pub fn set_delegate(&self, delegate: Arc<dyn TopologyDelegate>) {
        *self.inner.delegate.write().unwrap() = Some(delegate);
    }

    /// Routes one topology event: capacity-adding events debounce into a
    /// full sweep, breaking events enqueue their resource for a targeted
    /// recompilation, everything else is ignored.
    pub fn handle_event(&self, event: &TopologyEvent) {
        if event.requires_full_sweep() {
            let inner = self.inner.clone();
            self.recompile_all.schedule(self.recompile_delay, move || {
                debug!("topology gained capacity, sweeping for recompilable intents");
                inner.trigger(HashSet::new(), true);
            });
            return;
        }
        if let Some(resource) = event.tracked_resource() {
            self.work.add(resource);
        }
    }

    /// Updates the index from a freshly written record: intents heading into
    /// or resting in the installed state are registered against everything
    /// they depend on, every other state drops the registration. Keys this
    /// instance is not authoritative for are never indexed.
    pub fn track_intent(&self, data: &IntentData) {
        let track = self.store.is_master(&data.key)
            && matches!(
                data.state,
                IntentState::Installing | IntentState::Installed
            );
        if !track {
            self.inner.remove(&data.key);
            return;
        }
        let mut resources: HashSet<NetworkResource> =
            data.intent.resources.iter().cloned().collect();
        for leaf in &data.installables {
            resources.extend(leaf.resources.iter().cloned());
        }
        self.inner.add(&data.key, resources);
    }

    pub fn untrack(&self, key: &IntentKey) {
        self.inner.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use weft_intent::{ApplicationId, Intent, IntentKind, MemIntentStore};
    use weft_net::{ConnectPoint, DeviceEvent, DeviceId, HostEvent, HostId, LinkEvent};

    #[derive(Default)]
    struct RecordingDelegate {
        calls: Mutex<Vec<(HashSet<IntentKey>, bool)>>,
    }

    impl RecordingDelegate {
        fn calls(&self) -> Vec<(HashSet<IntentKey>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TopologyDelegate for RecordingDelegate {
        fn trigger_compile(&self, keys: HashSet<IntentKey>, compile_all_failed: bool) {
            self.calls.lock().unwrap().push((keys, compile_all_failed));
        }
    }

    fn link() -> LinkKey {
        LinkKey::new(
            ConnectPoint::new(DeviceId::new("of:01"), 1),
            ConnectPoint::new(DeviceId::new("of:02"), 2),
        )
    }

    fn installed_over(key: &str, resources: Vec<NetworkResource>) -> IntentData {
        let intent = Intent::builder(
            IntentKey::new(key),
            ApplicationId::new("app"),
            IntentKind::PointToPoint,
        )
        .resources(resources)
        .build();
        let mut data = IntentData::install(intent);
        data.set_state(IntentState::Compiling);
        data.set_state(IntentState::Installing);
        data.set_state(IntentState::Installed);
        data
    }

    fn quick_config() -> CoreConfig {
        CoreConfig {
            tracker_accumulator: crate::config::AccumulatorConfig {
                max_items: 100,
                max_batch_age: Duration::from_millis(20),
                max_idle_age: Duration::from_millis(5),
            },
            recompile_delay: Duration::from_millis(10),
            ..CoreConfig::default()
        }
    }

    fn tracker_with_delegate() -> (ObjectiveTracker, Arc<RecordingDelegate>) {
        let store = Arc::new(MemIntentStore::new());
        let tracker = ObjectiveTracker::new(&quick_config(), store);
        let delegate = Arc::new(RecordingDelegate::default());
        tracker.set_delegate(delegate.clone());
        (tracker, delegate)
    }

    #[tokio::test]
    async fn breaking_event_recompiles_tracked_intents_only() {
        let (tracker, delegate) = tracker_with_delegate();
        tracker.track_intent(&installed_over(
            "a",
            vec![NetworkResource::Link(link())],
        ));
        tracker.track_intent(&installed_over(
            "b",
            vec![NetworkResource::Host(HostId::new("h1"))],
        ));

        tracker.handle_event(&TopologyEvent::Link(LinkEvent::Removed(link())));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = delegate.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HashSet::from([IntentKey::new("a")]));
        assert!(!calls[0].1);
    }

    #[tokio::test]
    async fn capacity_event_debounces_into_one_full_sweep() {
        let (tracker, delegate) = tracker_with_delegate();

        for _ in 0..5 {
            tracker.handle_event(&TopologyEvent::Device(DeviceEvent::Added(DeviceId::new(
                "of:09",
            ))));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = delegate.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.is_empty());
        assert!(calls[0].1);
    }

    #[tokio::test]
    async fn untracked_intent_is_not_recompiled() {
        let (tracker, delegate) = tracker_with_delegate();
        tracker.track_intent(&installed_over(
            "a",
            vec![NetworkResource::Link(link())],
        ));
        tracker.untrack(&IntentKey::new("a"));

        tracker.handle_event(&TopologyEvent::Link(LinkEvent::Removed(link())));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(delegate.calls().is_empty());
    }

    #[tokio::test]
    async fn withdrawn_record_drops_its_registration() {
        let (tracker, delegate) = tracker_with_delegate();
        let mut data = installed_over("a", vec![NetworkResource::Link(link())]);
        tracker.track_intent(&data);

        data.set_state(IntentState::WithdrawReq);
        data.set_state(IntentState::Withdrawn);
        tracker.track_intent(&data);

        tracker.handle_event(&TopologyEvent::Link(LinkEvent::Removed(link())));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(delegate.calls().is_empty());
    }

    #[tokio::test]
    async fn host_move_targets_intents_on_that_host() {
        let (tracker, delegate) = tracker_with_delegate();
        tracker.track_intent(&installed_over(
            "a",
            vec![NetworkResource::Host(HostId::new("h1"))],
        ));

        tracker.handle_event(&TopologyEvent::Host(HostEvent::Moved(HostId::new("h1"))));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = delegate.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HashSet::from([IntentKey::new("a")]));
    }
}
