use std::sync::Arc;
use std::time::Duration;

use crate::data::IntentData;
use crate::error::StoreError;
use crate::event::IntentEvent;
use crate::intent::IntentKey;

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract the framework requires from the intent store: per-key
/// linearizable read-modify-write, a pending queue for submitted requests,
/// and changed-since queries for the cleanup sweep. The storage engine and
/// its replication are out of scope.
pub trait IntentStore: Send + Sync {
    /// Enqueues a request. Returns the lifecycle event the write made
    /// visible, if any.
    fn add_pending(&self, data: IntentData) -> StoreResult<Option<IntentEvent>>;

    /// Writes the current record for a key, pruning a superseded pending
    /// entry for the same key.
    fn write(&self, data: IntentData) -> StoreResult<Option<IntentEvent>>;

    /// Writes a batch in order, returning the events made visible.
    fn batch_write(&self, batch: Vec<IntentData>) -> StoreResult<Vec<IntentEvent>>;

    /// Current record for a key.
    fn get(&self, key: &IntentKey) -> Option<IntentData>;

    /// Pending request for a key.
    fn pending(&self, key: &IntentKey) -> Option<IntentData>;

    /// Current records at least `older_than` old. With `include_transient`,
    /// records in transient (non-settled) states are included as well.
    fn intent_data(&self, include_transient: bool, older_than: Duration) -> Vec<IntentData>;

    /// Pending requests at least `older_than` old.
    fn pending_data(&self, older_than: Duration) -> Vec<IntentData>;

    /// Removes the record and any pending entry for a key.
    fn remove(&self, key: &IntentKey) -> Option<IntentData>;

    /// Whether this instance is authoritative for the key.
    fn is_master(&self, key: &IntentKey) -> bool;
}

pub type DynIntentStore = Arc<dyn IntentStore>;
