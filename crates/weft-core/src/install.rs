use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;
use weft_intent::{Intent, IntentError, IntentKey, IntentKind};
use weft_net::{
    DeviceProgram, DynProgramSink, ProgramBatch, ProgramId, ProgramOp, ProgramStage,
};

/// The uninstall/install pair of installable leaves assigned to one
/// installer for one high-level intent.
#[derive(Debug, Clone)]
pub struct InstallerOp {
    /// Key of the high-level intent this work belongs to.
    pub key: IntentKey,
    pub uninstall: Vec<Intent>,
    pub install: Vec<Intent>,
}

impl InstallerOp {
    pub fn new(key: IntentKey) -> Self {
        Self {
            key,
            uninstall: Vec::new(),
            install: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uninstall.is_empty() && self.install.is_empty()
    }
}

/// A collaborator that turns installable intents into device programs and
/// dispatches them. `apply` reports exactly one outcome per call.
#[async_trait]
pub trait IntentInstaller: Send + Sync {
    async fn apply(&self, op: InstallerOp) -> Result<(), IntentError>;
}

/// Maps installable intent kinds to installers, walking the same fallback
/// chain as compiler lookup.
#[derive(Default)]
pub struct InstallerRegistry {
    installers: RwLock<IndexMap<IntentKind, Arc<dyn IntentInstaller>>>,
}

impl InstallerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: IntentKind, installer: Arc<dyn IntentInstaller>) {
        self.installers.write().unwrap().insert(kind, installer);
    }

    pub fn unregister(&self, kind: IntentKind) {
        self.installers.write().unwrap().shift_remove(&kind);
    }

    pub fn resolve(&self, kind: IntentKind) -> Option<Arc<dyn IntentInstaller>> {
        let installers = self.installers.read().unwrap();
        let mut cursor = Some(kind);
        while let Some(candidate) = cursor {
            if let Some(installer) = installers.get(&candidate) {
                return Some(installer.clone());
            }
            cursor = candidate.fallback();
        }
        None
    }
}

fn installation_error(key: &IntentKey, err: impl std::fmt::Display) -> IntentError {
    IntentError::Installation {
        key: key.clone(),
        reason: err.to_string(),
    }
}

/// Installer for program-bearing leaves, using the staged-batch shape of the
/// device-facing API: removes commit as one stage, adds and modifies as the
/// next, and the sink reports one aggregate completion.
///
/// The batch is a diff by program identity: a program present on both sides
/// with identical content is left untouched, one present with different
/// actions becomes a modify, and the rest become plain adds/removes.
pub struct ProgramInstaller {
    sink: DynProgramSink,
}

impl ProgramInstaller {
    pub fn new(sink: DynProgramSink) -> Self {
        Self { sink }
    }

    fn batch(op: &InstallerOp) -> ProgramBatch {
        let old: HashMap<ProgramId, &DeviceProgram> = op
            .uninstall
            .iter()
            .flat_map(|i| i.programs.iter())
            .map(|p| (p.id(), p))
            .collect();
        let new: HashMap<ProgramId, &DeviceProgram> = op
            .install
            .iter()
            .flat_map(|i| i.programs.iter())
            .map(|p| (p.id(), p))
            .collect();

        let mut removes = Vec::new();
        for (id, program) in &old {
            if !new.contains_key(id) {
                removes.push(ProgramOp::remove((*program).clone()));
            }
        }

        let mut installs = Vec::new();
        for (id, program) in &new {
            match old.get(id) {
                None => installs.push(ProgramOp::add((*program).clone())),
                Some(existing) if *existing != *program => {
                    installs.push(ProgramOp::modify((*program).clone()));
                }
                // Identical rule already on the device.
                Some(_) => {}
            }
        }

        let mut batch = ProgramBatch::new();
        batch.push_stage(ProgramStage(removes));
        batch.push_stage(ProgramStage(installs));
        batch
    }
}

#[async_trait]
impl IntentInstaller for ProgramInstaller {
    async fn apply(&self, op: InstallerOp) -> Result<(), IntentError> {
        let batch = Self::batch(&op);
        if batch.is_empty() {
            debug!(key = %op.key, "program diff is empty, nothing to dispatch");
            return Ok(());
        }
        self.sink
            .apply_batch(batch)
            .await
            .map_err(|e| installation_error(&op.key, e))
    }
}

/// Installer using the per-objective shape of the device-facing API: one
/// completion per operation. No overlap detection is attempted; the
/// uninstall side is removed in full before the install side is added.
pub struct ObjectiveInstaller {
    sink: DynProgramSink,
}

impl ObjectiveInstaller {
    pub fn new(sink: DynProgramSink) -> Self {
        Self { sink }
    }

    async fn apply_all(
        &self,
        key: &IntentKey,
        ops: Vec<ProgramOp>,
    ) -> Result<(), IntentError> {
        let results =
            futures::future::join_all(ops.into_iter().map(|op| self.sink.apply_op(op))).await;
        for result in results {
            result.map_err(|e| installation_error(key, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl IntentInstaller for ObjectiveInstaller {
    async fn apply(&self, op: InstallerOp) -> Result<(), IntentError> {
        let removes: Vec<ProgramOp> = op
            .uninstall
            .iter()
            .flat_map(|i| i.programs.iter())
            .map(|p| ProgramOp::remove(p.clone()))
            .collect();
        let adds: Vec<ProgramOp> = op
            .install
            .iter()
            .flat_map(|i| i.programs.iter())
            .map(|p| ProgramOp::add(p.clone()))
            .collect();

        // Removes act as a barrier ahead of the adds.
        self.apply_all(&op.key, removes).await?;
        self.apply_all(&op.key, adds).await
    }
}
