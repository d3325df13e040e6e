// ── Core error types ──
//
// Errors surfaced by the engine to its caller. Network failures of
// queued writes are never raised here: they land in the error queue.
// Collaborator failures (command execution, cloud clock, probes) are
// carried as boxed errors so implementations pick their own types.

use thiserror::Error;

use crate::command::CommandName;

/// Boxed error returned by injected collaborators.
pub type ExecutionError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Sync engine has not been initialized")]
    NotInitialized,

    #[error("Sync engine is already initialized")]
    AlreadyInitialized,

    // ── Command errors ───────────────────────────────────────────────
    #[error("Command factory cannot build {command_name} for resource type '{resource_type}'")]
    FactoryMiss {
        resource_type: String,
        command_name: CommandName,
    },

    #[error("ReadAll for '{resource_type}' can only run during bootstrap")]
    ReadAllOutsideBootstrap { resource_type: String },

    #[error("Command {command_name} cannot be executed: {reason}")]
    Unsupported {
        command_name: CommandName,
        reason: String,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Failure of a storage hook or of the layer wrapping it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend failed for key '{key}': {reason}")]
    Backend { key: String, reason: String },

    #[error("Stored document '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Encryption failure for key '{key}'")]
    Encryption { key: String },

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}
