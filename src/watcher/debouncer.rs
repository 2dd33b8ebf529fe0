//! Event coalescing for filesystem changes.
//!
//! Bursts of events on one path collapse to a single event inside the
//! debounce window: repeated modifications become one, a delete
//! followed by a create reads as a rename, and a create followed by a
//! delete cancels out entirely. Events are released once a path has
//! been quiet for the full window.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
    /// The path's previous identity, when known. Same-path
    /// delete+create inside the window also lands here.
    Renamed { from: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub path: PathBuf,
    /// Milliseconds since UNIX_EPOCH at observation time.
    pub timestamp_ms: u64,
}

impl FileChangeEvent {
    pub fn new(kind: FileChangeKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

#[derive(Debug)]
struct Pending {
    kind: FileChangeKind,
    timestamp_ms: u64,
    last_change: Instant,
}

/// Debounces file change events by path.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, Pending>,
    window: Duration,
}

impl Debouncer {
    /// Create a debouncer with the given window in milliseconds.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            window: Duration::from_millis(debounce_ms),
        }
    }

    /// Record an event, coalescing with any pending event on the path.
    /// Resets the window for that path.
    pub fn record(&mut self, event: FileChangeEvent) {
        let FileChangeEvent {
            kind,
            path,
            timestamp_ms,
        } = event;

        let merged = match self.pending.remove(&path) {
            None => Some(kind),
            Some(previous) => coalesce(previous.kind, kind),
        };

        if let Some(kind) = merged {
            self.pending.insert(
                path,
                Pending {
                    kind,
                    timestamp_ms,
                    last_change: Instant::now(),
                },
            );
        }
        // None: created-then-deleted inside the window nets to nothing.
    }

    /// Take all events whose path has been quiet for the full window.
    pub fn take_ready(&mut self) -> Vec<FileChangeEvent> {
        let now = Instant::now();
        let window = self.window;
        let mut ready = Vec::new();

        self.pending.retain(|path, pending| {
            if now.duration_since(pending.last_change) >= window {
                ready.push(FileChangeEvent {
                    kind: pending.kind.clone(),
                    path: path.clone(),
                    timestamp_ms: pending.timestamp_ms,
                });
                false
            } else {
                true
            }
        });

        ready.sort_by(|a, b| a.path.cmp(&b.path));
        ready
    }

    /// Drop everything pending (cancellation path).
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Merge a newly observed kind into the pending one. `None` means the
/// pair cancels out.
fn coalesce(previous: FileChangeKind, incoming: FileChangeKind) -> Option<FileChangeKind> {
    use FileChangeKind::*;
    Some(match (previous, incoming) {
        // A freshly created file that keeps changing is still a create.
        (Created, Modified) => Created,
        (Created, Deleted) => return None,
        (Created, kind @ Renamed { .. }) => kind,
        (Created, Created) => Created,

        (Modified, Deleted) => Deleted,
        (Modified, kind @ Renamed { .. }) => kind,
        (Modified, _) => Modified,

        // Delete then create within the window is a rename in place.
        (Deleted, Created) => Renamed {
            from: PathBuf::new(),
        },
        (Deleted, kind @ Renamed { .. }) => kind,
        (Deleted, _) => Deleted,

        // A rename followed by edits is still the rename.
        (kind @ Renamed { .. }, Modified | Created) => kind,
        (Renamed { .. }, Deleted) => Deleted,
        (Renamed { .. }, kind @ Renamed { .. }) => kind,
    })
}
