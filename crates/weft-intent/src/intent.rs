use std::fmt;

use serde::{Deserialize, Serialize};
use weft_net::{DeviceProgram, NetworkResource};

/// Stable identity of one logical connectivity request. Recompilations and
/// resubmissions of the same request share the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentKey(String);

impl IntentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owning application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tagged intent kind. Compiler and installer registries are keyed on this
/// tag; [`IntentKind::fallback`] is the statically declared delegation chain
/// a registry walks when no binding exists for the exact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Connectivity between two end hosts.
    HostToHost,
    /// Connectivity between two connect points.
    PointToPoint,
    /// Many ingress points funneled to one egress.
    MultiPointToSinglePoint,
    /// An explicit set of links to carry traffic over.
    LinkCollection,
    /// Leaf: concrete device programs, dispatched as a staged batch.
    FlowProgram,
    /// Leaf: concrete device programs, dispatched one objective at a time.
    ObjectiveSet,
}

impl IntentKind {
    /// Next kind to consult when no compiler/installer is registered for
    /// this one. The chain is finite and acyclic by construction.
    pub fn fallback(self) -> Option<IntentKind> {
        match self {
            IntentKind::HostToHost => Some(IntentKind::PointToPoint),
            IntentKind::MultiPointToSinglePoint => Some(IntentKind::LinkCollection),
            _ => None,
        }
    }

    /// Leaf kinds describe device-level actions and need no compilation.
    pub fn is_installable(self) -> bool {
        matches!(self, IntentKind::FlowProgram | IntentKind::ObjectiveSet)
    }

    /// Whether installables of this kind expose their device programs in a
    /// form the coordinator may compare for overlap elimination. Other
    /// kinds are always uninstalled and reinstalled across a recompilation.
    pub fn carries_programs(self) -> bool {
        matches!(self, IntentKind::FlowProgram)
    }

    /// Kinds that tolerate partial failure are retried opportunistically by
    /// every full recompilation sweep.
    pub fn tolerates_partial_failure(self) -> bool {
        matches!(self, IntentKind::MultiPointToSinglePoint)
    }
}

/// Immutable declarative connectivity request.
///
/// Never mutated after creation; re-submitting produces a new value sharing
/// the same [`IntentKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub key: IntentKey,
    pub app_id: ApplicationId,
    pub kind: IntentKind,
    /// Topology resources this intent depends on.
    pub resources: Vec<NetworkResource>,
    /// Leaf intents are device-programmable and skip compilation.
    pub installable: bool,
    /// Compiler-specific parameters; opaque to the framework.
    pub params: serde_json::Value,
    /// Device programs, populated by compilers for program-bearing leaves.
    pub programs: Vec<DeviceProgram>,
}

impl Intent {
    pub fn builder(
        key: IntentKey,
        app_id: ApplicationId,
        kind: IntentKind,
    ) -> IntentBuilder {
        IntentBuilder {
            intent: Intent {
                key,
                app_id,
                kind,
                resources: Vec::new(),
                installable: kind.is_installable(),
                params: serde_json::Value::Null,
                programs: Vec::new(),
            },
        }
    }
}

pub struct IntentBuilder {
    intent: Intent,
}

impl IntentBuilder {
    pub fn resource(mut self, resource: NetworkResource) -> Self {
        self.intent.resources.push(resource);
        self
    }

    pub fn resources(mut self, resources: impl IntoIterator<Item = NetworkResource>) -> Self {
        self.intent.resources.extend(resources);
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.intent.params = params;
        self
    }

    pub fn programs(mut self, programs: Vec<DeviceProgram>) -> Self {
        self.intent.programs = programs;
        self
    }

    pub fn build(self) -> Intent {
        self.intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chain_is_acyclic() {
        for kind in [
            IntentKind::HostToHost,
            IntentKind::PointToPoint,
            IntentKind::MultiPointToSinglePoint,
            IntentKind::LinkCollection,
            IntentKind::FlowProgram,
            IntentKind::ObjectiveSet,
        ] {
            let mut seen = vec![kind];
            let mut cur = kind;
            while let Some(next) = cur.fallback() {
                assert!(!seen.contains(&next), "cycle through {next:?}");
                seen.push(next);
                cur = next;
            }
        }
    }

    #[test]
    fn builder_defaults_installable_from_kind() {
        let leaf = Intent::builder(
            IntentKey::new("k"),
            ApplicationId::new("app"),
            IntentKind::FlowProgram,
        )
        .build();
        assert!(leaf.installable);

        let high = Intent::builder(
            IntentKey::new("k"),
            ApplicationId::new("app"),
            IntentKind::PointToPoint,
        )
        .build();
        assert!(!high.installable);
    }
}
