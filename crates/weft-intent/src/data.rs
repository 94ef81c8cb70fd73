use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::intent::{Intent, IntentKey};
use crate::state::{IntentState, RequestKind};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Mutable lifecycle record for one intent key. Exactly one exists per key;
/// the store owns it and is the only place mutation is durable.
///
/// Invariant: `installables` is non-empty only while the state is
/// INSTALLING, INSTALLED, WITHDRAWING or CORRUPT-after-attempt; it is empty
/// once WITHDRAWN or freshly FAILED before the first compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentData {
    pub key: IntentKey,
    pub intent: Intent,
    pub state: IntentState,
    pub request: RequestKind,
    /// Installable leaves produced by the last successful compilation.
    pub installables: Vec<Intent>,
    /// Monotonically increasing count of failed install/withdraw attempts.
    pub error_count: u32,
    pub updated_at_ms: u64,
}

impl IntentData {
    fn new(intent: Intent, state: IntentState, request: RequestKind) -> Self {
        Self {
            key: intent.key.clone(),
            intent,
            state,
            request,
            installables: Vec::new(),
            error_count: 0,
            updated_at_ms: now_ms(),
        }
    }

    /// A fresh install request for `intent`.
    pub fn install(intent: Intent) -> Self {
        Self::new(intent, IntentState::InstallReq, RequestKind::Install)
    }

    /// A fresh withdraw request for `intent`.
    pub fn withdraw(intent: Intent) -> Self {
        Self::new(intent, IntentState::WithdrawReq, RequestKind::Withdraw)
    }

    /// A purge request: withdraw if needed, then remove the record.
    pub fn purge(intent: Intent) -> Self {
        Self::new(intent, IntentState::PurgeReq, RequestKind::Purge)
    }

    /// Applies a state transition if it is an edge of the lifecycle graph;
    /// refuses and warns otherwise. Returns whether the transition applied.
    pub fn set_state(&mut self, next: IntentState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                key = %self.key,
                from = ?self.state,
                to = ?next,
                "refusing illegal intent state transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at_ms = now_ms();
        true
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = now_ms();
    }

    /// Age of the record relative to `now_ms()`.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(self.updated_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ApplicationId, IntentKind};

    fn intent() -> Intent {
        Intent::builder(
            IntentKey::new("a"),
            ApplicationId::new("app"),
            IntentKind::PointToPoint,
        )
        .build()
    }

    #[test]
    fn illegal_transition_is_refused() {
        let mut data = IntentData::install(intent());
        assert!(!data.set_state(IntentState::Installed));
        assert_eq!(data.state, IntentState::InstallReq);
        assert!(data.set_state(IntentState::Compiling));
        assert_eq!(data.state, IntentState::Compiling);
    }

    #[test]
    fn fresh_requests_start_empty() {
        let data = IntentData::install(intent());
        assert!(data.installables.is_empty());
        assert_eq!(data.error_count, 0);
        assert_eq!(data.request, RequestKind::Install);
    }
}
