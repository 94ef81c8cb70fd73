//! Network model shared by the intent framework: topology resources, the
//! opaque device-program abstraction, staged operation batches, topology
//! change events, and the device-facing apply trait.

mod event;
mod program;
mod resource;
mod sink;

pub use event::{DeviceEvent, HostEvent, LinkEvent, TopologyEvent};
pub use program::{
    DeviceProgram, ProgramBatch, ProgramError, ProgramId, ProgramOp, ProgramOpKind, ProgramStage,
};
pub use resource::{ConnectPoint, DeviceId, HostId, LinkKey, NetworkResource, PortNumber};
pub use sink::{DynProgramSink, ProgramSink};
