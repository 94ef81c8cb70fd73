//! In-memory doubles for exercising the framework without devices.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use weft_intent::IntentEvent;
use weft_net::{
    DeviceId, ProgramBatch, ProgramError, ProgramOp, ProgramSink,
};

use crate::manager::IntentListener;

/// A [`ProgramSink`] that records every dispatched operation and can be told
/// to reject anything targeting a given device.
#[derive(Default)]
pub struct RecordingSink {
    ops: Mutex<Vec<ProgramOp>>,
    batches: Mutex<Vec<ProgramBatch>>,
    failing: Mutex<HashSet<DeviceId>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations applied so far, batch stages flattened in order.
    pub fn ops(&self) -> Vec<ProgramOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<ProgramBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Makes every future operation against `device` fail.
    pub fn fail_device(&self, device: DeviceId) {
        self.failing.lock().unwrap().insert(device);
    }

    pub fn heal_device(&self, device: &DeviceId) {
        self.failing.lock().unwrap().remove(device);
    }

    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
        self.batches.lock().unwrap().clear();
    }

    fn check(&self, op: &ProgramOp) -> Result<(), ProgramError> {
        let device = &op.program.device;
        if self.failing.lock().unwrap().contains(device) {
            return Err(ProgramError::Rejected {
                device: device.clone(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramSink for RecordingSink {
    async fn apply_batch(&self, batch: ProgramBatch) -> Result<(), ProgramError> {
        self.batches.lock().unwrap().push(batch.clone());
        for stage in batch.stages() {
            for op in &stage.0 {
                self.check(op)?;
                self.ops.lock().unwrap().push(op.clone());
            }
        }
        Ok(())
    }

    async fn apply_op(&self, op: ProgramOp) -> Result<(), ProgramError> {
        self.check(&op)?;
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

/// An [`IntentListener`] that records events and wakes waiters on each one.
#[derive(Default)]
pub struct CollectingListener {
    events: Mutex<Vec<IntentEvent>>,
    notify: Notify,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IntentEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Waits until `predicate` holds over the events seen so far.
    pub async fn wait_for<F>(&self, predicate: F)
    where
        F: Fn(&[IntentEvent]) -> bool,
    {
        loop {
            let notified = self.notify.notified();
            if predicate(&self.events.lock().unwrap()) {
                return;
            }
            notified.await;
        }
    }
}

impl IntentListener for CollectingListener {
    fn on_event(&self, event: &IntentEvent) {
        self.events.lock().unwrap().push(event.clone());
        self.notify.notify_waiters();
    }
}
