use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::DeviceId;

/// Opaque device-scoped match/action instruction set.
///
/// Identity ([`ProgramId`]) is derived from (device, selector, table,
/// priority) and deliberately excludes the action list: rewriting only the
/// actions of an otherwise-identical rule is an update to the same entity,
/// not a new one. Values are never mutated after dispatch; an update is a
/// new value sharing the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProgram {
    pub device: DeviceId,
    /// Serialized match predicate; opaque to the framework.
    pub selector: String,
    pub table: u32,
    pub priority: u32,
    /// Opaque action list, excluded from identity.
    pub actions: Vec<String>,
}

impl DeviceProgram {
    pub fn new(
        device: DeviceId,
        selector: impl Into<String>,
        table: u32,
        priority: u32,
        actions: Vec<String>,
    ) -> Self {
        Self {
            device,
            selector: selector.into(),
            table,
            priority,
            actions,
        }
    }

    /// Deterministic identity of this program.
    pub fn id(&self) -> ProgramId {
        ProgramId {
            device: self.device.clone(),
            selector: self.selector.clone(),
            table: self.table,
            priority: self.priority,
        }
    }
}

/// Identity of a [`DeviceProgram`]; see there for what it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramId {
    pub device: DeviceId,
    pub selector: String,
    pub table: u32,
    pub priority: u32,
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/t{}/p{}/{}",
            self.device, self.table, self.priority, self.selector
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramOpKind {
    Add,
    Modify,
    Remove,
}

/// One device-program operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramOp {
    pub kind: ProgramOpKind,
    pub program: DeviceProgram,
}

impl ProgramOp {
    pub fn add(program: DeviceProgram) -> Self {
        Self {
            kind: ProgramOpKind::Add,
            program,
        }
    }

    pub fn modify(program: DeviceProgram) -> Self {
        Self {
            kind: ProgramOpKind::Modify,
            program,
        }
    }

    pub fn remove(program: DeviceProgram) -> Self {
        Self {
            kind: ProgramOpKind::Remove,
            program,
        }
    }
}

/// One stage of a batch. Operations within a stage carry no ordering
/// guarantee relative to one another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramStage(pub Vec<ProgramOp>);

impl ProgramStage {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered list of stages. Stage order is a hard dependency barrier: every
/// operation in stage `n` must be acknowledged before stage `n + 1` is
/// dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBatch {
    stages: Vec<ProgramStage>,
}

impl ProgramBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage; empty stages are dropped.
    pub fn push_stage(&mut self, stage: ProgramStage) {
        if !stage.is_empty() {
            self.stages.push(stage);
        }
    }

    pub fn stages(&self) -> &[ProgramStage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Total operation count across stages.
    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.0.len()).sum()
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProgramError {
    #[error("device {device} rejected program operations: {reason}")]
    Rejected { device: DeviceId, reason: String },
    #[error("timed out waiting for device {device}")]
    Timeout { device: DeviceId },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(actions: Vec<&str>) -> DeviceProgram {
        DeviceProgram::new(
            DeviceId::new("of:01"),
            "in_port=1,eth_type=0x800",
            0,
            100,
            actions.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn identity_ignores_actions() {
        let a = program(vec!["output:2"]);
        let b = program(vec!["output:3"]);
        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn identity_covers_match_table_priority() {
        let a = program(vec!["output:2"]);
        let mut b = a.clone();
        b.priority = 200;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn empty_stages_are_dropped() {
        let mut batch = ProgramBatch::new();
        batch.push_stage(ProgramStage::default());
        batch.push_stage(ProgramStage(vec![ProgramOp::add(program(vec![]))]));
        assert_eq!(batch.stages().len(), 1);
        assert_eq!(batch.len(), 1);
    }
}
