use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use weft_intent::{Intent, IntentData, IntentError, IntentKind, IntentState};

use crate::install::{InstallerOp, InstallerRegistry};

/// Coordinates one transactional installation: classifies installable
/// leaves per installer, prunes redundant work across a recompilation,
/// dispatches every per-installer operation concurrently, and aggregates
/// their completions into a single outcome.
///
/// Completions are message-passed: each dispatched operation reports onto a
/// per-transaction channel which this task drains until nothing is pending,
/// so the "everything finished" decision is made exactly once without
/// shared mutable pending/error sets.
pub struct InstallCoordinator {
    installers: Arc<InstallerRegistry>,
}

impl InstallCoordinator {
    pub fn new(installers: Arc<InstallerRegistry>) -> Self {
        Self { installers }
    }

    /// Runs the transaction and returns the terminal records to write: on
    /// success the install side becomes INSTALLED (or the uninstall side
    /// WITHDRAWN for a pure withdrawal); on any error every side involved
    /// becomes CORRUPT with its error count incremented and its
    /// installables left untouched for the retry.
    pub async fn install_intents(
        &self,
        to_uninstall: Option<IntentData>,
        to_install: Option<IntentData>,
    ) -> Vec<IntentData> {
        let (uninstall_leaves, install_leaves) =
            effective_leaves(to_uninstall.as_ref(), to_install.as_ref());

        let key = match (&to_install, &to_uninstall) {
            (Some(i), _) => i.key.clone(),
            (None, Some(u)) => u.key.clone(),
            (None, None) => return Vec::new(),
        };

        // One operation context per distinct installer.
        let mut ops: IndexMap<IntentKind, InstallerOp> = IndexMap::new();
        for leaf in uninstall_leaves {
            ops.entry(leaf.kind)
                .or_insert_with(|| InstallerOp::new(key.clone()))
                .uninstall
                .push(leaf);
        }
        for leaf in install_leaves {
            ops.entry(leaf.kind)
                .or_insert_with(|| InstallerOp::new(key.clone()))
                .install
                .push(leaf);
        }

        let mut errors: Vec<IntentError> = Vec::new();
        let mut pending: HashSet<IntentKind> = HashSet::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<(IntentKind, Result<(), IntentError>)>();

        for (kind, op) in ops {
            if op.is_empty() {
                continue;
            }
            match self.installers.resolve(kind) {
                Some(installer) => {
                    pending.insert(kind);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let result = installer.apply(op).await;
                        let _ = tx.send((kind, result));
                    });
                }
                // Configuration error; fatal to this intent only.
                None => {
                    error!(key = %key, ?kind, "no installer registered for installable kind");
                    errors.push(IntentError::NoInstaller(kind));
                }
            }
        }
        drop(tx);

        while let Some((kind, result)) = rx.recv().await {
            pending.remove(&kind);
            if let Err(err) = result {
                warn!(key = %key, ?kind, error = %err, "installer operation failed");
                errors.push(err);
            }
        }
        // The channel closing with work still pending means an installer
        // task died without reporting; its dispatch is unacknowledged.
        for kind in pending {
            error!(key = %key, ?kind, "installer task ended without reporting a result");
            errors.push(IntentError::Installation {
                key: key.clone(),
                reason: format!("installer for {kind:?} terminated without completing"),
            });
        }

        finish(to_uninstall, to_install, errors)
    }
}

/// Redundancy elimination: work out the leaves actually worth dispatching.
///
/// A leaf scheduled for uninstall that is identical to a leaf scheduled for
/// install, or whose device programs are a superset of one, is dropped
/// from the uninstall side; when the uninstall record was already
/// INSTALLED, the matched install leaf is dropped too, so a recompilation
/// that reproduced the same forwarding state toggles nothing. Only
/// program-bearing kinds participate; other kinds keep the conservative
/// uninstall-then-install behavior.
///
/// Operates on copies: the records written on completion keep their full
/// installables lists regardless of what is pruned here.
fn effective_leaves(
    to_uninstall: Option<&IntentData>,
    to_install: Option<&IntentData>,
) -> (Vec<Intent>, Vec<Intent>) {
    let mut uninstall: Vec<Intent> = to_uninstall
        .map(|d| d.installables.clone())
        .unwrap_or_default();
    let mut install: Vec<Intent> = to_install
        .map(|d| d.installables.clone())
        .unwrap_or_default();

    let (Some(old), Some(_)) = (to_uninstall, to_install) else {
        return (uninstall, install);
    };
    let old_installed = old.state == IntentState::Installed;

    let mut keep_uninstall = vec![true; uninstall.len()];
    let mut keep_install = vec![true; install.len()];
    for (ui, old_leaf) in uninstall.iter().enumerate() {
        for (ii, new_leaf) in install.iter().enumerate() {
            if !keep_install[ii] {
                continue;
            }
            if covers(old_leaf, new_leaf) {
                keep_uninstall[ui] = false;
                if old_installed {
                    keep_install[ii] = false;
                }
                break;
            }
        }
    }

    let mut ku = keep_uninstall.iter();
    uninstall.retain(|_| *ku.next().unwrap_or(&true));
    let mut ki = keep_install.iter();
    install.retain(|_| *ki.next().unwrap_or(&true));

    if uninstall.is_empty() && install.is_empty() {
        debug!(key = %old.key, "recompilation produced identical forwarding state");
    }
    (uninstall, install)
}

/// Whether the already-installed `old` leaf makes installing `new` a no-op:
/// identical values, or program-bearing leaves where `old`'s programs are a
/// superset of `new`'s.
fn covers(old: &Intent, new: &Intent) -> bool {
    if old == new {
        return true;
    }
    if !old.kind.carries_programs() || !new.kind.carries_programs() {
        return false;
    }
    !new.programs.is_empty() && new.programs.iter().all(|p| old.programs.contains(p))
}

fn finish(
    to_uninstall: Option<IntentData>,
    to_install: Option<IntentData>,
    errors: Vec<IntentError>,
) -> Vec<IntentData> {
    if errors.is_empty() {
        if let Some(mut install) = to_install {
            install.set_state(IntentState::Installed);
            install.error_count = 0;
            return vec![install];
        }
        if let Some(mut uninstall) = to_uninstall {
            uninstall.set_state(IntentState::Withdrawn);
            uninstall.installables.clear();
            uninstall.error_count = 0;
            return vec![uninstall];
        }
        return Vec::new();
    }

    // Partial failure: every side involved becomes CORRUPT with its error
    // count incremented; installables are preserved so the retry can
    // recompute from the attempted state.
    let mut writes = Vec::new();
    let install_key = to_install.as_ref().map(|d| d.key.clone());
    if let Some(mut uninstall) = to_uninstall {
        if install_key.as_ref() != Some(&uninstall.key) {
            uninstall.set_state(IntentState::Corrupt);
            uninstall.error_count += 1;
            writes.push(uninstall);
        }
    }
    if let Some(mut install) = to_install {
        install.set_state(IntentState::Corrupt);
        install.error_count += 1;
        writes.push(install);
    }
    writes
}
