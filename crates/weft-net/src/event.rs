use serde::{Deserialize, Serialize};

use crate::resource::{DeviceId, HostId, LinkKey, NetworkResource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    Added(LinkKey),
    /// Metadata-only change; carried state is unaffected.
    Updated(LinkKey),
    /// Link went down. `durable` links are expected to come back and do not
    /// invalidate installed state on their own.
    Down { key: LinkKey, durable: bool },
    Removed(LinkKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    Added(DeviceId),
    Updated(DeviceId),
    AvailabilityChanged { device: DeviceId, available: bool },
    Removed(DeviceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Added(HostId),
    Moved(HostId),
    Updated(HostId),
    Removed(HostId),
}

/// Typed topology/resource/host change notification consumed by the
/// objective tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TopologyEvent {
    Link(LinkEvent),
    Device(DeviceEvent),
    Host(HostEvent),
}

impl TopologyEvent {
    /// Whether this event may un-strand previously failed intents and thus
    /// warrants a full recompilation sweep: new capacity appeared (link
    /// added, device added or newly available). Events that only break
    /// existing state are answered with a targeted recompilation of the
    /// intents tracked against the affected resource instead.
    pub fn requires_full_sweep(&self) -> bool {
        match self {
            TopologyEvent::Link(LinkEvent::Added(_)) => true,
            TopologyEvent::Device(DeviceEvent::Added(_)) => true,
            TopologyEvent::Device(DeviceEvent::AvailabilityChanged { available, .. }) => *available,
            _ => false,
        }
    }

    /// The tracked resource a targeted recompilation should be keyed on.
    /// `None` for events that are ignored (metadata updates, durable link
    /// down) or handled by the full sweep.
    pub fn tracked_resource(&self) -> Option<NetworkResource> {
        match self {
            TopologyEvent::Link(LinkEvent::Removed(key)) => {
                Some(NetworkResource::Link(key.clone()))
            }
            TopologyEvent::Link(LinkEvent::Down { key, durable }) if !durable => {
                Some(NetworkResource::Link(key.clone()))
            }
            TopologyEvent::Device(DeviceEvent::AvailabilityChanged { device, available })
                if !available =>
            {
                Some(NetworkResource::Device(device.clone()))
            }
            TopologyEvent::Device(DeviceEvent::Removed(device)) => {
                Some(NetworkResource::Device(device.clone()))
            }
            TopologyEvent::Host(HostEvent::Added(host))
            | TopologyEvent::Host(HostEvent::Moved(host))
            | TopologyEvent::Host(HostEvent::Removed(host)) => {
                Some(NetworkResource::Host(host.clone()))
            }
            _ => None,
        }
    }
}
