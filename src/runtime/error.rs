//! Error types for the Tickwork runtime
//!
//! Domain errors use thiserror; script bodies and filesystem helpers use
//! anyhow and are converted at the runtime boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Script lifecycle errors
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Registry / reconstruction errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Agent is already logged in
    #[error("Agent {0} is already loaded")]
    AgentAlreadyLoaded(String),

    /// Agent is not logged in
    #[error("Agent {0} is not loaded")]
    AgentNotLoaded(String),

    /// The sim thread is gone or refused the work
    #[error("Sim thread unavailable: {0}")]
    SimThread(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        RuntimeError::Storage(StorageError::Other(format!("{err:#}")))
    }
}

/// Programming errors raised by scripts and suspension gates
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// A suspension gate was submitted twice
    #[error("Suspension gate already submitted")]
    GateAlreadySubmitted,

    /// Stack index outside of bounds
    #[error("Stack index {index} out of bounds (len {len})")]
    StackIndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Stack length
        len: usize,
    },
}

/// Convenience result alias for script operations
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Script registry and reconstruction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory registered for the persisted type identity
    #[error("Script type '{0}' not found")]
    TypeNotFound(String),

    /// A factory was registered twice under the same identity
    #[error("Script type '{0}' is already registered")]
    DuplicateType(String),

    /// A persisted payload does not match the script's data type
    #[error("Malformed payload for script type '{kind}': {detail}")]
    MalformedPayload {
        /// Script type identity
        kind: String,
        /// Decoding failure
        detail: String,
    },

    /// A persistent script was stored without a payload
    #[error("Missing payload for persistent script type '{0}'")]
    MissingPayload(String),

    /// The script failed to produce a serializable snapshot
    #[error("Snapshot of script type '{kind}' failed: {detail}")]
    SnapshotFailed {
        /// Script type identity
        kind: String,
        /// Encoding failure
        detail: String,
    },
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Anything reported through anyhow by the filesystem helpers
    #[error("{0}")]
    Other(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
