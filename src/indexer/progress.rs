//! Progress and result types for indexing runs.

use serde::{Deserialize, Serialize};

/// Phases of a project index, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Scanning,
    Parsing,
    Extracting,
    Storing,
    Linking,
}

/// Typed progress event, broadcast to UI/CLI consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingProgressEvent {
    pub phase: IndexPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

/// One per-file failure, recorded without aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

/// Final result of an indexing run. Success means no file failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingReport {
    pub files_indexed: usize,
    pub files_failed: usize,
    /// Unchanged files skipped by the hash diff.
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub calls_resolved: usize,
    pub ghost_refs: usize,
    pub ghosts_collected: usize,
    pub total_time_ms: u64,
    pub errors: Vec<FileError>,
    /// Set when the run was cancelled; counts above are partial.
    pub cancelled: bool,
}

impl IndexingReport {
    pub fn success(&self) -> bool {
        self.files_failed == 0 && !self.cancelled
    }
}
