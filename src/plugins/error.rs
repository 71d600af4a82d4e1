use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while scanning a search path
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read plugin directory {path}: {source}")]
    UnreadablePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read descriptor of {path}: {reason}")]
    UnreadableDescriptor { path: PathBuf, reason: String },
}

/// Errors raised while opening a module or constructing its root instance
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleLoadError {
    #[error("missing entry point: {0}")]
    MissingEntryPoint(&'static str),

    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    AbiMismatch { expected: u32, actual: u32 },

    #[error("module factory returned a null instance")]
    NullInstance,

    #[error("module reports id '{actual}' but its descriptor declares '{expected}'")]
    DescriptorMismatch { expected: String, actual: String },

    #[error("module is part of a dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("module binary is no longer available")]
    ImageReleased,
}

/// Errors raised by a module's own lifecycle steps
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("initialize failed: {0}")]
    Initialize(String),

    #[error("start failed: {0}")]
    Start(String),

    #[error("{phase} panicked: {message}")]
    Panicked { phase: &'static str, message: String },
}
