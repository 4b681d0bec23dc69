//! Error types for the compiler bridge
//!
//! Two families are kept apart. [`ConfigError`] is raised synchronously for
//! a malformed request, before any module is touched. [`BridgeError`] covers
//! everything that can go wrong once an invocation is running. A failure
//! reported by the compiler itself is neither; it is a regular
//! [`CompileResult::Failure`].
//!
//! [`CompileResult::Failure`]: crate::CompileResult::Failure

use thiserror::Error;

/// Caller-side usage error detected while validating a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("no entry points were given")]
    NoEntryPoints,

    #[error("the entry point {0} is not provided in sources")]
    MissingEntryPoint(String),
}

/// Failure of the bridge itself during a running invocation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("failed to load compiler payload: {0}")]
    Payload(String),

    #[error("failed to instantiate compiler module: {0}")]
    Instantiation(String),

    #[error("export not found: {0}")]
    ExportNotFound(String),

    #[error("memory allocation failed: requested {size} bytes")]
    Allocation { size: u32 },

    #[error("memory access out of bounds: offset={offset}, size={size}")]
    MemoryOutOfBounds { offset: u32, size: u32 },

    #[error("failed to marshal request: {0}")]
    Marshalling(String),

    #[error("compiler invocation trapped: {0}")]
    Invocation(String),

    #[error("failed to decode compiler response: {0}")]
    Decoding(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid bridge settings: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the error was produced while decoding the module's answer
    pub fn is_decoding(&self) -> bool {
        matches!(self, BridgeError::Decoding(_))
    }
}

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error of the one-shot entry points, which both validate and run
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
