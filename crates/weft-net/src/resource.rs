use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a network element (switch, router) as understood by the
/// southbound layer, e.g. `of:0000000000000001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an end host attached to the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port number on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortNumber(pub u32);

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One end of a link: a (device, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectPoint {
    pub device: DeviceId,
    pub port: PortNumber,
}

impl ConnectPoint {
    pub fn new(device: DeviceId, port: u32) -> Self {
        Self {
            device,
            port: PortNumber(port),
        }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.port)
    }
}

/// Directed link identity between two connect points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
}

impl LinkKey {
    pub fn new(src: ConnectPoint, dst: ConnectPoint) -> Self {
        Self { src, dst }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// A topology resource an intent can declare a dependency on. Links are
/// indexed separately from element-like resources by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkResource {
    Device(DeviceId),
    Host(HostId),
    Link(LinkKey),
}

impl NetworkResource {
    pub fn is_link(&self) -> bool {
        matches!(self, NetworkResource::Link(_))
    }
}

impl fmt::Display for NetworkResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkResource::Device(d) => write!(f, "device:{d}"),
            NetworkResource::Host(h) => write!(f, "host:{h}"),
            NetworkResource::Link(l) => write!(f, "link:{l}"),
        }
    }
}
