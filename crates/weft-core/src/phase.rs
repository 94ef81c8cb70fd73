use tracing::{debug, warn};
use weft_intent::{CompileError, Intent, IntentData, IntentKey, IntentState, RequestKind};

use crate::compile::CompilerRegistry;
use crate::install::InstallerRegistry;

/// Result of driving one pending request through the processing phases.
#[derive(Debug)]
pub enum PhaseOutcome {
    /// Hand the uninstall/install pair to the install coordinator.
    Coordinate {
        to_uninstall: Option<IntentData>,
        to_install: Option<IntentData>,
    },
    /// Terminal record; write it to the store.
    Write(IntentData),
    /// Remove the record for this key from the store.
    Purge(IntentKey),
}

/// One processing step. Each state captures everything the step consumes.
enum Phase {
    Start {
        pending: IntentData,
        current: Option<IntentData>,
    },
    InstallRequest {
        pending: IntentData,
        current: Option<IntentData>,
    },
    Compiling {
        pending: IntentData,
        current: Option<IntentData>,
    },
    WithdrawRequest {
        pending: IntentData,
        current: Option<IntentData>,
    },
    PurgeRequest {
        pending: IntentData,
        current: Option<IntentData>,
    },
    Done(PhaseOutcome),
}

/// Explicit state-machine driver for intent processing: a loop that asks,
/// per state, what the next state and side effect is, until a terminal
/// outcome. Compilation happens inline; device interaction is deferred to
/// the coordinator via [`PhaseOutcome::Coordinate`].
pub struct PhaseMachine<'a> {
    compilers: &'a CompilerRegistry,
    installers: &'a InstallerRegistry,
}

impl<'a> PhaseMachine<'a> {
    pub fn new(compilers: &'a CompilerRegistry, installers: &'a InstallerRegistry) -> Self {
        Self {
            compilers,
            installers,
        }
    }

    /// A compilation result no registered installer can convert is a
    /// configuration failure, caught before anything reaches a device.
    fn unconvertible(&self, installables: &[Intent]) -> bool {
        installables
            .iter()
            .any(|leaf| self.installers.resolve(leaf.kind).is_none())
    }

    /// Drives `pending` against the store's `current` record to an outcome.
    /// Never raises: every failure is converted into a terminal record.
    pub fn run(&self, pending: IntentData, current: Option<IntentData>) -> PhaseOutcome {
        let mut phase = Phase::Start { pending, current };
        loop {
            phase = match phase {
                Phase::Done(outcome) => return outcome,
                other => self.step(other),
            };
        }
    }

    fn step(&self, phase: Phase) -> Phase {
        match phase {
            Phase::Start { pending, current } => match pending.request {
                RequestKind::Install => Phase::InstallRequest { pending, current },
                RequestKind::Withdraw => Phase::WithdrawRequest { pending, current },
                RequestKind::Purge => Phase::PurgeRequest { pending, current },
            },

            Phase::InstallRequest {
                mut pending,
                current,
            } => {
                pending.set_state(IntentState::Compiling);
                Phase::Compiling { pending, current }
            }

            Phase::Compiling {
                mut pending,
                current,
            } => {
                let previous = current.as_ref().map(|c| c.installables.as_slice());
                match self.compilers.compile(&pending.intent, previous) {
                    Ok(installables) if self.unconvertible(&installables) => {
                        warn!(key = %pending.key, "no installer for a compiled leaf, intent failed");
                        pending.installables.clear();
                        pending.set_state(IntentState::Failed);
                        Phase::Done(PhaseOutcome::Write(pending))
                    }
                    Ok(installables) => {
                        pending.installables = installables;
                        pending.set_state(IntentState::Installing);
                        let to_uninstall =
                            current.filter(|c| !c.installables.is_empty());
                        Phase::Done(PhaseOutcome::Coordinate {
                            to_uninstall,
                            to_install: Some(pending),
                        })
                    }
                    Err(CompileError::NoPath(key)) => {
                        // Domain rejection, not a framework bug.
                        debug!(key = %key, "no viable path, intent failed");
                        pending.installables.clear();
                        pending.set_state(IntentState::Failed);
                        Phase::Done(PhaseOutcome::Write(pending))
                    }
                    Err(err) => {
                        warn!(key = %pending.key, error = %err, "intent compilation failed");
                        pending.installables.clear();
                        pending.set_state(IntentState::Failed);
                        Phase::Done(PhaseOutcome::Write(pending))
                    }
                }
            }

            Phase::WithdrawRequest {
                mut pending,
                current,
            } => match current {
                // Something is installed (or mid-flight): derive the
                // uninstall set from the current installables so a retried
                // withdrawal works from recomputed state.
                Some(c) if !c.installables.is_empty() => {
                    pending.installables = c.installables.clone();
                    pending.set_state(IntentState::Withdrawing);
                    Phase::Done(PhaseOutcome::Coordinate {
                        to_uninstall: Some(pending),
                        to_install: None,
                    })
                }
                _ => {
                    pending.installables.clear();
                    pending.set_state(IntentState::Withdrawn);
                    Phase::Done(PhaseOutcome::Write(pending))
                }
            },

            Phase::PurgeRequest {
                mut pending,
                current,
            } => match current {
                Some(c) if !c.installables.is_empty() => {
                    // Withdraw first; the record is removed once the
                    // withdrawal settles with empty installables.
                    pending.installables = c.installables.clone();
                    pending.set_state(IntentState::Withdrawing);
                    Phase::Done(PhaseOutcome::Coordinate {
                        to_uninstall: Some(pending),
                        to_install: None,
                    })
                }
                _ => Phase::Done(PhaseOutcome::Purge(pending.key)),
            },

            Phase::Done(outcome) => Phase::Done(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_intent::{ApplicationId, IntentKind};

    use crate::compile::IntentCompiler;
    use crate::install::ProgramInstaller;
    use crate::testkit::RecordingSink;

    /// Registry that can convert program-bearing leaves.
    fn installers() -> InstallerRegistry {
        let registry = InstallerRegistry::new();
        registry.register(
            IntentKind::FlowProgram,
            Arc::new(ProgramInstaller::new(Arc::new(RecordingSink::new()))),
        );
        registry
    }

    struct LeafCompiler;
    impl IntentCompiler for LeafCompiler {
        fn compile(
            &self,
            intent: &Intent,
            _previous: Option<&[Intent]>,
        ) -> Result<Vec<Intent>, CompileError> {
            Ok(vec![
                Intent::builder(
                    intent.key.clone(),
                    intent.app_id.clone(),
                    IntentKind::FlowProgram,
                )
                .build(),
            ])
        }
    }

    struct NoPathCompiler;
    impl IntentCompiler for NoPathCompiler {
        fn compile(
            &self,
            intent: &Intent,
            _previous: Option<&[Intent]>,
        ) -> Result<Vec<Intent>, CompileError> {
            Err(CompileError::NoPath(intent.key.clone()))
        }
    }

    fn intent() -> Intent {
        Intent::builder(
            IntentKey::new("a"),
            ApplicationId::new("app"),
            IntentKind::PointToPoint,
        )
        .build()
    }

    #[test]
    fn install_compiles_and_hands_to_coordinator() {
        let registry = CompilerRegistry::new();
        registry.register(IntentKind::PointToPoint, Arc::new(LeafCompiler));

        let outcome = PhaseMachine::new(&registry, &installers()).run(IntentData::install(intent()), None);
        match outcome {
            PhaseOutcome::Coordinate {
                to_uninstall,
                to_install: Some(data),
            } => {
                assert!(to_uninstall.is_none());
                assert_eq!(data.state, IntentState::Installing);
                assert_eq!(data.installables.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn recompile_carries_the_previous_record_to_uninstall() {
        let registry = CompilerRegistry::new();
        registry.register(IntentKind::PointToPoint, Arc::new(LeafCompiler));

        let mut installed = IntentData::install(intent());
        installed.set_state(IntentState::Compiling);
        installed.installables = vec![
            Intent::builder(
                IntentKey::new("a"),
                ApplicationId::new("app"),
                IntentKind::FlowProgram,
            )
            .build(),
        ];
        installed.set_state(IntentState::Installing);
        installed.set_state(IntentState::Installed);

        let outcome =
            PhaseMachine::new(&registry, &installers()).run(IntentData::install(intent()), Some(installed));
        match outcome {
            PhaseOutcome::Coordinate { to_uninstall, .. } => {
                assert!(to_uninstall.is_some());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn no_path_fails_with_empty_installables() {
        let registry = CompilerRegistry::new();
        registry.register(IntentKind::PointToPoint, Arc::new(NoPathCompiler));

        let outcome = PhaseMachine::new(&registry, &installers()).run(IntentData::install(intent()), None);
        match outcome {
            PhaseOutcome::Write(data) => {
                assert_eq!(data.state, IntentState::Failed);
                assert!(data.installables.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_compiler_also_fails_the_intent() {
        let registry = CompilerRegistry::new();
        let outcome = PhaseMachine::new(&registry, &installers()).run(IntentData::install(intent()), None);
        assert!(matches!(
            outcome,
            PhaseOutcome::Write(IntentData {
                state: IntentState::Failed,
                ..
            })
        ));
    }

    #[test]
    fn unconvertible_leaf_fails_before_dispatch() {
        let registry = CompilerRegistry::new();
        registry.register(IntentKind::PointToPoint, Arc::new(LeafCompiler));
        let no_installers = InstallerRegistry::new();

        let outcome = PhaseMachine::new(&registry, &no_installers)
            .run(IntentData::install(intent()), None);
        match outcome {
            PhaseOutcome::Write(data) => {
                assert_eq!(data.state, IntentState::Failed);
                assert!(data.installables.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn withdraw_of_nothing_installed_settles_immediately() {
        let registry = CompilerRegistry::new();
        let outcome = PhaseMachine::new(&registry, &installers()).run(IntentData::withdraw(intent()), None);
        match outcome {
            PhaseOutcome::Write(data) => {
                assert_eq!(data.state, IntentState::Withdrawn);
                assert!(data.installables.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn withdraw_re_derives_uninstall_set_from_current_state() {
        let registry = CompilerRegistry::new();
        let leaf = Intent::builder(
            IntentKey::new("a"),
            ApplicationId::new("app"),
            IntentKind::FlowProgram,
        )
        .build();

        let mut installed = IntentData::install(intent());
        installed.set_state(IntentState::Compiling);
        installed.installables = vec![leaf.clone()];
        installed.set_state(IntentState::Installing);
        installed.set_state(IntentState::Installed);

        let outcome =
            PhaseMachine::new(&registry, &installers()).run(IntentData::withdraw(intent()), Some(installed));
        match outcome {
            PhaseOutcome::Coordinate {
                to_uninstall: Some(data),
                to_install: None,
            } => {
                assert_eq!(data.state, IntentState::Withdrawing);
                assert_eq!(data.installables, vec![leaf]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn purge_of_settled_record_removes_it() {
        let registry = CompilerRegistry::new();
        let mut failed = IntentData::install(intent());
        failed.set_state(IntentState::Compiling);
        failed.set_state(IntentState::Failed);

        let outcome = PhaseMachine::new(&registry, &installers()).run(IntentData::purge(intent()), Some(failed));
        assert!(matches!(outcome, PhaseOutcome::Purge(_)));
    }
}
