use std::sync::Arc;

use async_trait::async_trait;

use crate::program::{ProgramBatch, ProgramError, ProgramOp};

/// Device-facing apply API.
///
/// Two shapes are offered and installers may use either: a staged batch with
/// one aggregate completion for the whole batch, or a single operation with
/// its own completion. Implementations resolve the future only once the
/// device (or driver session) has acknowledged the work; the framework never
/// inspects partial progress.
#[async_trait]
pub trait ProgramSink: Send + Sync {
    /// Applies a staged batch. Stage `n + 1` must not be dispatched before
    /// every operation of stage `n` is acknowledged.
    async fn apply_batch(&self, batch: ProgramBatch) -> Result<(), ProgramError>;

    /// Applies one operation with a per-operation completion.
    async fn apply_op(&self, op: ProgramOp) -> Result<(), ProgramError>;
}

pub type DynProgramSink = Arc<dyn ProgramSink>;
