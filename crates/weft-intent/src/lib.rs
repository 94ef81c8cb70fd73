//! Intent data model: immutable intent values, mutable per-key lifecycle
//! records, the state transition graph, lifecycle events, the error
//! taxonomy, and the intent store contract with an in-memory backend.

mod data;
mod error;
mod event;
mod intent;
mod mem;
mod state;
mod store;

pub use data::{IntentData, now_ms};
pub use error::{CompileError, IntentError, StoreError};
pub use event::{IntentEvent, IntentEventKind};
pub use intent::{ApplicationId, Intent, IntentBuilder, IntentKey, IntentKind};
pub use mem::MemIntentStore;
pub use state::{IntentState, RequestKind};
pub use store::{DynIntentStore, IntentStore, StoreResult};
