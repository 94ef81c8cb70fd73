use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::data::IntentData;
use crate::event::IntentEvent;
use crate::intent::IntentKey;
use crate::state::IntentState;
use crate::store::{IntentStore, StoreResult};

/// In-memory intent store for tests and single-node deployments. Writes are
/// serialized per map by the lock, which gives the per-key linearizable
/// read-modify-write the contract asks for.
#[derive(Clone, Default)]
pub struct MemIntentStore {
    current: Arc<RwLock<HashMap<IntentKey, IntentData>>>,
    pending: Arc<RwLock<HashMap<IntentKey, IntentData>>>,
}

impl std::fmt::Debug for MemIntentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemIntentStore")
            .field("current", &self.current.read().unwrap().len())
            .field("pending", &self.pending.read().unwrap().len())
            .finish()
    }
}

impl MemIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn settled(state: IntentState) -> bool {
        state.is_terminal()
    }
}

impl IntentStore for MemIntentStore {
    fn add_pending(&self, data: IntentData) -> StoreResult<Option<IntentEvent>> {
        let event = IntentEvent::from_data(&data);
        let mut pending = self.pending.write().unwrap();
        // Last write wins per key; an older resubmission never clobbers a
        // newer request.
        match pending.get(&data.key) {
            Some(existing) if existing.updated_at_ms > data.updated_at_ms => Ok(None),
            _ => {
                pending.insert(data.key.clone(), data);
                Ok(event)
            }
        }
    }

    fn write(&self, data: IntentData) -> StoreResult<Option<IntentEvent>> {
        let event = IntentEvent::from_data(&data);
        {
            let mut pending = self.pending.write().unwrap();
            if let Some(p) = pending.get(&data.key) {
                if p.updated_at_ms <= data.updated_at_ms {
                    pending.remove(&data.key);
                }
            }
        }
        self.current
            .write()
            .unwrap()
            .insert(data.key.clone(), data);
        Ok(event)
    }

    fn batch_write(&self, batch: Vec<IntentData>) -> StoreResult<Vec<IntentEvent>> {
        let mut events = Vec::with_capacity(batch.len());
        for data in batch {
            if let Some(event) = self.write(data)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn get(&self, key: &IntentKey) -> Option<IntentData> {
        self.current.read().unwrap().get(key).cloned()
    }

    fn pending(&self, key: &IntentKey) -> Option<IntentData> {
        self.pending.read().unwrap().get(key).cloned()
    }

    fn intent_data(&self, include_transient: bool, older_than: Duration) -> Vec<IntentData> {
        self.current
            .read()
            .unwrap()
            .values()
            .filter(|d| include_transient || Self::settled(d.state))
            .filter(|d| d.age() >= older_than)
            .cloned()
            .collect()
    }

    fn pending_data(&self, older_than: Duration) -> Vec<IntentData> {
        self.pending
            .read()
            .unwrap()
            .values()
            .filter(|d| d.age() >= older_than)
            .cloned()
            .collect()
    }

    fn remove(&self, key: &IntentKey) -> Option<IntentData> {
        self.pending.write().unwrap().remove(key);
        self.current.write().unwrap().remove(key)
    }

    fn is_master(&self, _key: &IntentKey) -> bool {
        true
    }
}
