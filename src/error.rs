//! Error types for the code knowledge engine.
//!
//! Structured errors using thiserror, split by layer. Startup errors
//! (store unavailable, schema mismatch, failed migration) are fatal;
//! per-file errors are recorded as diagnostics and indexing continues.

use crate::types::{EntityId, EntityKind};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Store could not be opened: lock held by a live process or the
    /// engine failed to initialize. Fatal at startup.
    #[error("Store unavailable at '{path}': {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },

    /// Store schema is newer than this build understands. Fatal at startup.
    #[error("Store schema version {store_version} is newer than supported version {code_version}")]
    SchemaMismatch {
        store_version: i64,
        code_version: i64,
    },

    /// A migration step raised. Prior steps remain committed.
    #[error("Migration {version} ({name}) failed: {reason}")]
    MigrationFailed {
        version: i64,
        name: String,
        reason: String,
    },

    /// The parser collaborator returned an error tree for a file.
    /// Recorded per file; the file is skipped and its old rows remain.
    #[error("Failed to parse '{path}': {reason}")]
    ParseFailure { path: PathBuf, reason: String },

    /// An entity extractor raised. Extraction continues for the file.
    #[error("Extraction failed for {kind} '{name}' in '{path}': {reason}")]
    ExtractionFailure {
        path: PathBuf,
        kind: EntityKind,
        name: String,
        reason: String,
    },

    /// Deterministic id collision: two distinct source tuples hashed to
    /// the same identifier. Never silently overwritten.
    #[error("Entity id collision on {id}: '{existing}' vs '{incoming}'")]
    IdCollision {
        id: EntityId,
        existing: String,
        incoming: String,
    },

    /// Watcher backpressure cap reached; oldest unrelated event dropped.
    #[error("Watcher buffer overflow: dropped event for '{path}'")]
    WatcherOverflow { path: PathBuf },

    /// Semantic analyzer exceeded its wall-clock budget.
    #[error("Analyzer '{analyzer}' timed out after {timeout_ms}ms for entity {entity}")]
    AnalyzerTimeout {
        analyzer: &'static str,
        entity: EntityId,
        timeout_ms: u64,
    },

    /// Malformed model-invocation outcome record. Dropped with warning.
    #[error("Invalid feedback outcome: {reason}")]
    FeedbackOutcomeInvalid { reason: String },

    /// Indexing aborted because too many files failed.
    #[error("Aborted after {failed} file failures (threshold {threshold})")]
    FailureThresholdExceeded { failed: usize, threshold: usize },

    /// The operation was cancelled; partial results may be available.
    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    /// General errors for cases where we need to preserve context strings.
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get recovery suggestions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::StoreUnavailable { .. } => vec![
                "Check whether another synapta process is running against this store",
                "If the previous process crashed, the stale lock is removed on next open",
            ],
            Self::SchemaMismatch { .. } => vec![
                "This store was written by a newer build; upgrade synapta",
                "Or re-create the store directory to index from scratch",
            ],
            Self::MigrationFailed { .. } => vec![
                "Prior migration steps remain committed; the store is consistent",
                "Fix the reported step and re-open to resume migration",
            ],
            Self::IdCollision { .. } => {
                vec!["Report this: id collisions indicate a hashing defect, not user error"]
            }
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::FailureThresholdExceeded { .. } => vec![
                "Inspect the per-file errors in the indexing result",
                "Raise indexing.failure_threshold to tolerate more bad files",
            ],
            _ => vec![],
        }
    }

    /// Startup errors stop the service; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::SchemaMismatch { .. }
                | Self::MigrationFailed { .. }
        )
    }
}

/// Errors from the embedded graph store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Exclusive-access marker held by a live process.
    #[error("Store at '{path}' is locked by process {pid}")]
    Locked { path: PathBuf, pid: u32 },

    /// Startup verification failed; the on-disk store is not usable.
    #[error("Store corrupt: {reason}")]
    Corrupt { reason: String },

    /// Concurrent transaction conflict; the caller may retry.
    #[error("Store busy: {reason}")]
    Busy { reason: String },

    /// Script rejected or failed.
    #[error("Query failed: {message}")]
    Query { message: String },

    /// Schema declaration error (bad relation/column definition).
    #[error("Schema error: {reason}")]
    Schema { reason: String },

    /// A row referenced a column the result set does not carry.
    #[error("Column '{column}' missing from result set")]
    MissingColumn { column: String },

    /// A stored value had an unexpected type.
    #[error("Unexpected value in column '{column}': expected {expected}")]
    UnexpectedValue {
        column: String,
        expected: &'static str,
    },
}

impl StoreError {
    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors specific to the watcher subsystem.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Failed to watch '{path}': {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Watcher event channel closed")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        Self::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
