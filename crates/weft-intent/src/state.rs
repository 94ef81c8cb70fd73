use serde::{Deserialize, Serialize};

/// Lifecycle state of one intent key.
///
/// ```text
/// INSTALL_REQ -> COMPILING -> INSTALLING -> INSTALLED
///                        \-> FAILED
/// INSTALLED -> WITHDRAW_REQ -> WITHDRAWING -> WITHDRAWN
/// any non-terminal, on install/withdraw error -> CORRUPT
/// CORRUPT/FAILED, on resubmission -> INSTALL_REQ / WITHDRAW_REQ
/// PURGE_REQ: record removed once installables are empty
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    InstallReq,
    Compiling,
    Installing,
    Installed,
    Failed,
    WithdrawReq,
    Withdrawing,
    Withdrawn,
    /// An installation or withdrawal partially failed; retryable.
    Corrupt,
    PurgeReq,
}

impl IntentState {
    /// Whether the transition `self -> next` is an edge of the lifecycle
    /// graph.
    pub fn can_transition_to(self, next: IntentState) -> bool {
        use IntentState::*;
        match (self, next) {
            (InstallReq, Compiling) => true,
            (Compiling, Installing | Failed) => true,
            (Installing, Installed) => true,
            (WithdrawReq, Withdrawing | Withdrawn) => true,
            (Withdrawing, Withdrawn) => true,
            (PurgeReq, Withdrawing | Withdrawn) => true,
            // Install/withdraw error from any non-terminal state.
            (InstallReq | Compiling | Installing | WithdrawReq | Withdrawing | PurgeReq, Corrupt) => {
                true
            }
            // Resubmission of a settled record.
            (Installed | Failed | Corrupt | Withdrawn, InstallReq | WithdrawReq | PurgeReq) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IntentState::Installed
                | IntentState::Failed
                | IntentState::Withdrawn
                | IntentState::Corrupt
        )
    }

    /// States a full recompilation sweep resubmits.
    pub fn needs_recompile(self) -> bool {
        matches!(
            self,
            IntentState::InstallReq | IntentState::Failed | IntentState::WithdrawReq
        )
    }

    /// States treated as stuck once older than the cleanup deadline.
    pub fn is_stuck(self) -> bool {
        matches!(self, IntentState::Installing | IntentState::Withdrawing)
    }
}

/// The kind of request pending for an intent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Install,
    Withdraw,
    Purge,
}
