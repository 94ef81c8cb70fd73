use serde::{Deserialize, Serialize};

use crate::data::{IntentData, now_ms};
use crate::intent::IntentKey;
use crate::state::IntentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentEventKind {
    InstallReq,
    WithdrawReq,
    PurgeReq,
    Installed,
    Failed,
    Withdrawn,
    Corrupt,
    /// The record was removed from the store.
    Purged,
}

/// Lifecycle event emitted when a store write makes a state visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentEvent {
    pub kind: IntentEventKind,
    pub key: IntentKey,
    pub at_ms: u64,
}

impl IntentEvent {
    pub fn new(kind: IntentEventKind, key: IntentKey) -> Self {
        Self {
            kind,
            key,
            at_ms: now_ms(),
        }
    }

    pub fn purged(key: IntentKey) -> Self {
        Self::new(IntentEventKind::Purged, key)
    }

    /// Event for a written record. Transient states are not announced.
    pub fn from_data(data: &IntentData) -> Option<Self> {
        let kind = match data.state {
            IntentState::InstallReq => IntentEventKind::InstallReq,
            IntentState::WithdrawReq => IntentEventKind::WithdrawReq,
            IntentState::PurgeReq => IntentEventKind::PurgeReq,
            IntentState::Installed => IntentEventKind::Installed,
            IntentState::Failed => IntentEventKind::Failed,
            IntentState::Withdrawn => IntentEventKind::Withdrawn,
            IntentState::Corrupt => IntentEventKind::Corrupt,
            IntentState::Compiling | IntentState::Installing | IntentState::Withdrawing => {
                return None;
            }
        };
        Some(Self::new(kind, data.key.clone()))
    }
}
