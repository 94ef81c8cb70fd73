use thiserror::Error;

use crate::intent::{IntentKey, IntentKind};

/// Compilation failures. `NoCompiler` is a configuration error; the other
/// variants are domain rejections raised by a specific compiler.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("no compiler registered for intent kind {0:?} or its fallback chain")]
    NoCompiler(IntentKind),
    #[error("no viable path for intent {0}")]
    NoPath(IntentKey),
    #[error("compilation of intent {key} failed: {reason}")]
    Other { key: IntentKey, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("no intent data for key {0}")]
    NotFound(IntentKey),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Framework-level error taxonomy. Every variant is fatal to one intent
/// only; nothing here is allowed to escape the per-intent processing chain.
#[derive(Debug, Clone, Error)]
pub enum IntentError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("no installer registered for intent kind {0:?}")]
    NoInstaller(IntentKind),
    #[error("installation of intent {key} failed: {reason}")]
    Installation { key: IntentKey, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
