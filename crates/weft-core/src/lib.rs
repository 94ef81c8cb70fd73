//! Intent compilation and installation framework.
//!
//! Declarative connectivity requests are compiled recursively into
//! installable leaves, diffed against the previously installed state, and
//! dispatched to device-facing installers as a coordinated transaction. A
//! reverse index maps live topology events back to the intents they affect,
//! a keyed accumulator amortizes bursts of updates, and a periodic cleanup
//! loop resubmits anything stuck or corrupted past a deadline.

mod accumulator;
mod cleanup;
mod compile;
mod config;
mod coordinator;
mod install;
mod manager;
mod phase;
pub mod testkit;
mod timer;
mod tracker;

pub use accumulator::Accumulator;
pub use cleanup::{IntentCleanup, RetryDelegate};
pub use compile::{CompilerRegistry, IntentCompiler};
pub use config::{AccumulatorConfig, CoreConfig};
pub use coordinator::InstallCoordinator;
pub use install::{
    InstallerOp, InstallerRegistry, IntentInstaller, ObjectiveInstaller, ProgramInstaller,
};
pub use manager::{IntentListener, IntentManager};
pub use phase::{PhaseMachine, PhaseOutcome};
pub use timer::DelayedTask;
pub use tracker::{ObjectiveTracker, TopologyDelegate};
