use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tracing::debug;
use weft_intent::{CompileError, Intent, IntentKind};

/// A collaborator that expands one intent into zero or more (possibly still
/// non-installable) child intents. May reject the request with a domain
/// error such as [`CompileError::NoPath`].
pub trait IntentCompiler: Send + Sync {
    fn compile(
        &self,
        intent: &Intent,
        previous: Option<&[Intent]>,
    ) -> Result<Vec<Intent>, CompileError>;
}

/// Maps intent kinds to registered compilers and recursively expands
/// non-installable intents into installable leaves.
///
/// Lookup walks the kind's statically declared fallback chain when no
/// compiler is registered for the exact kind, and memoizes the resolved
/// binding for that kind. Recursion depth is bounded only by the
/// compiler-to-compiler delegation actually registered; the registry does
/// not detect delegation cycles.
#[derive(Default)]
pub struct CompilerRegistry {
    compilers: RwLock<IndexMap<IntentKind, Arc<dyn IntentCompiler>>>,
    /// Memoized exact-kind -> resolved-kind bindings from fallback walks.
    bindings: RwLock<HashMap<IntentKind, IntentKind>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: IntentKind, compiler: Arc<dyn IntentCompiler>) {
        self.compilers.write().unwrap().insert(kind, compiler);
        // Memoized bindings may now be stale: a more specific compiler
        // appeared.
        self.bindings.write().unwrap().clear();
    }

    pub fn unregister(&self, kind: IntentKind) {
        self.compilers.write().unwrap().shift_remove(&kind);
        self.bindings
            .write()
            .unwrap()
            .retain(|k, v| *k != kind && *v != kind);
    }

    fn resolve(&self, kind: IntentKind) -> Result<Arc<dyn IntentCompiler>, CompileError> {
        let compilers = self.compilers.read().unwrap();
        if let Some(compiler) = compilers.get(&kind) {
            return Ok(compiler.clone());
        }
        if let Some(bound) = self.bindings.read().unwrap().get(&kind) {
            if let Some(compiler) = compilers.get(bound) {
                return Ok(compiler.clone());
            }
        }
        let mut cursor = kind.fallback();
        while let Some(candidate) = cursor {
            if let Some(compiler) = compilers.get(&candidate) {
                debug!(?kind, resolved = ?candidate, "memoizing compiler fallback binding");
                self.bindings.write().unwrap().insert(kind, candidate);
                return Ok(compiler.clone());
            }
            cursor = candidate.fallback();
        }
        Err(CompileError::NoCompiler(kind))
    }

    /// Recursively compiles `intent` down to installable leaves, in the
    /// order compilers produce them. Installable intents are returned as-is.
    pub fn compile(
        &self,
        intent: &Intent,
        previous: Option<&[Intent]>,
    ) -> Result<Vec<Intent>, CompileError> {
        if intent.installable {
            return Ok(vec![intent.clone()]);
        }
        let compiler = self.resolve(intent.kind)?;
        let children = compiler.compile(intent, previous)?;
        let mut leaves = Vec::with_capacity(children.len());
        for child in &children {
            leaves.extend(self.compile(child, previous)?);
        }
        Ok(leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_intent::{ApplicationId, IntentKey};

    /// Compiles into the given children, recording invocation count.
    struct FixedCompiler {
        children: Vec<Intent>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FixedCompiler {
        fn new(children: Vec<Intent>) -> Arc<Self> {
            Arc::new(Self {
                children,
                calls: Default::default(),
            })
        }
    }

    impl IntentCompiler for FixedCompiler {
        fn compile(
            &self,
            _intent: &Intent,
            _previous: Option<&[Intent]>,
        ) -> Result<Vec<Intent>, CompileError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.children.clone())
        }
    }

    fn intent(kind: IntentKind) -> Intent {
        Intent::builder(IntentKey::new("k"), ApplicationId::new("app"), kind).build()
    }

    #[test]
    fn installable_intent_is_the_base_case() {
        let registry = CompilerRegistry::new();
        let leaf = intent(IntentKind::FlowProgram);
        let out = registry.compile(&leaf, None).unwrap();
        assert_eq!(out, vec![leaf]);
    }

    #[test]
    fn recursion_flattens_to_installables_only() {
        let registry = CompilerRegistry::new();
        registry.register(
            IntentKind::PointToPoint,
            FixedCompiler::new(vec![intent(IntentKind::LinkCollection)]),
        );
        registry.register(
            IntentKind::LinkCollection,
            FixedCompiler::new(vec![
                intent(IntentKind::FlowProgram),
                intent(IntentKind::FlowProgram),
            ]),
        );

        let out = registry.compile(&intent(IntentKind::PointToPoint), None).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.installable));
    }

    #[test]
    fn missing_compiler_is_an_error() {
        let registry = CompilerRegistry::new();
        let err = registry
            .compile(&intent(IntentKind::LinkCollection), None)
            .unwrap_err();
        assert!(matches!(err, CompileError::NoCompiler(IntentKind::LinkCollection)));
    }

    #[test]
    fn fallback_chain_is_walked_and_memoized() {
        let registry = CompilerRegistry::new();
        let p2p = FixedCompiler::new(vec![intent(IntentKind::FlowProgram)]);
        registry.register(IntentKind::PointToPoint, p2p.clone());

        // HostToHost has no compiler; PointToPoint is its declared fallback.
        let out = registry.compile(&intent(IntentKind::HostToHost), None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(
            registry
                .bindings
                .read()
                .unwrap()
                .contains_key(&IntentKind::HostToHost)
        );

        // Second lookup is served from the memoized binding.
        registry.compile(&intent(IntentKind::HostToHost), None).unwrap();
        assert_eq!(p2p.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn registering_a_specific_compiler_invalidates_bindings() {
        let registry = CompilerRegistry::new();
        registry.register(
            IntentKind::PointToPoint,
            FixedCompiler::new(vec![intent(IntentKind::FlowProgram)]),
        );
        registry.compile(&intent(IntentKind::HostToHost), None).unwrap();

        let specific = FixedCompiler::new(vec![intent(IntentKind::ObjectiveSet)]);
        registry.register(IntentKind::HostToHost, specific.clone());

        registry.compile(&intent(IntentKind::HostToHost), None).unwrap();
        assert_eq!(specific.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn domain_errors_propagate_unchanged() {
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
        let registry = CompilerRegistry::new();
        registry.register(IntentKind::PointToPoint, Arc::new(NoPathCompiler));

        let err = registry
            .compile(&intent(IntentKind::PointToPoint), None)
            .unwrap_err();
        assert!(matches!(err, CompileError::NoPath(_)));
    }
}
