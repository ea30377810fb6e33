//! Error types for EntryStor

use thiserror::Error;

use crate::cache::IdentityToken;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache entry store
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Stream Errors
    // =========================================================================
    /// Write attempted on a sealed stream
    #[error("Stream is sealed: no further writes are accepted")]
    StreamSealed,

    /// Read attempted before the stream was sealed
    #[error("Stream is not ready: content has not been sealed yet")]
    StreamNotReady,

    /// The writer was dropped before sealing
    #[error("Stream was aborted before it was sealed")]
    StreamAborted,

    /// Stream exceeds the configured size limit
    #[error("Stream too large: {size} bytes exceeds limit of {limit} bytes")]
    StreamTooLarge { size: usize, limit: usize },

    // =========================================================================
    // Revalidation / Store Errors
    // =========================================================================
    /// The revalidation collaborator reported a state that cannot occur
    #[error("Inconsistent revalidation for {key}: {reason}")]
    InconsistentRevalidation { key: String, reason: String },

    /// A decision that needs an existing entry was applied to an uncached key
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The entry a handle was bound to has been superseded
    #[error("Stale entry for {key}: expected identity {expected}, current is {current}")]
    StaleEntry {
        key: String,
        expected: IdentityToken,
        current: IdentityToken,
    },

    /// Identity minting violated its ordering invariant
    #[error("Identity collision for {key}: minted {minted} does not supersede {previous}")]
    IdentityCollision {
        key: String,
        previous: IdentityToken,
        minted: IdentityToken,
    },

    // =========================================================================
    // Durability Errors
    // =========================================================================
    /// One or more persistence operations failed before the flush barrier
    #[error("Flush failed: {failures} persistence operation(s) failed, first: {first}")]
    FlushFailed { failures: usize, first: String },

    /// Flush barrier did not complete in time
    #[error("Flush timed out after {0:?}")]
    FlushTimeout(std::time::Duration),

    /// Persistence collaborator error
    #[error("Persistence error: {0}")]
    Persistence(String),

    // =========================================================================
    // Collaborator / Tooling Errors
    // =========================================================================
    /// Revalidation collaborator error
    #[error("Origin error: {0}")]
    Origin(String),

    /// Scenario replay error
    #[error("Scenario error: {0}")]
    Scenario(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

