//! Filesystem watcher driving incremental re-indexing.
//!
//! A single cooperative task receives raw notify events, debounces them
//! (250 ms default) and forwards coalesced [`FileChangeEvent`]s to the
//! consumer over a bounded channel. When the consumer lags, events are
//! buffered up to a fixed cap; past the cap the oldest unrelated event
//! is dropped while the latest event per path is kept. The watcher
//! never writes to the store itself — the coordinator does.

pub mod debouncer;

pub use debouncer::{Debouncer, FileChangeEvent, FileChangeKind};

use crate::config::Settings;
use crate::error::WatchError;
use crate::indexer::{Indexer, IndexingReport};
use crate::project::ScannedFile;
use crate::types::Language;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

/// Overflow buffer between the debouncer and the consumer channel.
struct OverflowBuffer {
    queue: VecDeque<FileChangeEvent>,
    cap: usize,
}

impl OverflowBuffer {
    fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Keep the latest event per path; past the cap, drop the oldest
    /// event not touching the incoming path.
    fn push(&mut self, event: FileChangeEvent) {
        self.queue.retain(|pending| pending.path != event.path);

        if self.queue.len() >= self.cap {
            let victim = self
                .queue
                .iter()
                .position(|pending| pending.path != event.path)
                .unwrap_or(0);
            if let Some(dropped) = self.queue.remove(victim) {
                tracing::warn!(
                    target: "watcher",
                    "buffer overflow: dropped event for '{}'",
                    dropped.path.display()
                );
            }
        }
        self.queue.push_back(event);
    }

    fn pop(&mut self) -> Option<FileChangeEvent> {
        self.queue.pop_front()
    }

    /// Return an event to the head after a failed send.
    fn requeue(&mut self, event: FileChangeEvent) {
        self.queue.push_front(event);
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The filesystem watcher. Build with [`FileWatcher::spawn`]; consume
/// events from the returned receiver.
pub struct FileWatcher {
    _watcher: notify::RecommendedWatcher,
    pub events: mpsc::Receiver<FileChangeEvent>,
}

impl FileWatcher {
    /// Watch `root` recursively. Events flow until `cancel` fires; on
    /// cancellation buffered events are discarded.
    pub fn spawn(
        root: &Path,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<Self, WatchError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::WatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let (out_tx, out_rx) = mpsc::channel::<FileChangeEvent>(64);
        let debounce_ms = settings.watcher.debounce_ms;
        let buffer_cap = settings.watcher.buffer_cap;

        tokio::spawn(async move {
            let mut debouncer = Debouncer::new(debounce_ms);
            let mut buffer = OverflowBuffer::new(buffer_cap);

            crate::log_event!("watcher", "started");
            loop {
                let tick = sleep(Duration::from_millis(50));
                tokio::pin!(tick);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debouncer.discard();
                        buffer.clear();
                        crate::log_event!("watcher", "stopped");
                        return;
                    }

                    maybe = raw_rx.recv() => {
                        match maybe {
                            Some(Ok(event)) => {
                                for change in classify(event) {
                                    debouncer.record(change);
                                }
                            }
                            Some(Err(e)) => {
                                tracing::error!(target: "watcher", "watch error: {e}");
                            }
                            None => return,
                        }
                    }

                    _ = &mut tick => {
                        for event in debouncer.take_ready() {
                            buffer.push(event);
                        }
                        // Drain the buffer without blocking the loop.
                        while let Some(event) = buffer.pop() {
                            match out_tx.try_send(event) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(event)) => {
                                    buffer.requeue(event);
                                    break;
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return,
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            events: out_rx,
        })
    }
}

/// Map a raw notify event onto change events.
fn classify(event: Event) -> Vec<FileChangeEvent> {
    use notify::event::{ModifyKind, RenameMode};

    match event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .filter(|p| is_source(p))
            .map(|p| FileChangeEvent::new(FileChangeKind::Created, p))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter(|p| is_source(p))
            .map(|p| FileChangeEvent::new(FileChangeKind::Deleted, p))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let from = event.paths[0].clone();
            let to = event.paths[1].clone();
            if is_source(&to) {
                vec![FileChangeEvent::new(FileChangeKind::Renamed { from }, to)]
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|p| is_source(p))
            .map(|p| FileChangeEvent::new(FileChangeKind::Modified, p))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(Language::from_extension)
        .is_some_and(|lang| lang != Language::Unknown)
}

/// Apply one coalesced change through the coordinator.
///
/// created/modified → hash + extract + link; deleted → cascade delete;
/// renamed → delete(old) then create(new). Because entity ids include
/// the relative path, a rename changes every id in the file.
pub async fn apply_change(
    indexer: &Indexer,
    root: &Path,
    event: &FileChangeEvent,
) -> crate::error::IndexResult<IndexingReport> {
    match &event.kind {
        FileChangeKind::Created | FileChangeKind::Modified => {
            match scan_single(root, &event.path) {
                Some(file) => indexer.index_files(vec![file], Vec::new()).await,
                // Vanished between the event and now: treat as delete.
                None => {
                    indexer
                        .index_files(Vec::new(), vec![relative_of(root, &event.path)])
                        .await
                }
            }
        }
        FileChangeKind::Deleted => {
            indexer
                .index_files(Vec::new(), vec![relative_of(root, &event.path)])
                .await
        }
        FileChangeKind::Renamed { from } => {
            let mut removed = Vec::new();
            if !from.as_os_str().is_empty() {
                removed.push(relative_of(root, from));
            }
            match scan_single(root, &event.path) {
                Some(file) => indexer.index_files(vec![file], removed).await,
                None => {
                    removed.push(relative_of(root, &event.path));
                    indexer.index_files(Vec::new(), removed).await
                }
            }
        }
    }
}

fn relative_of(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Hash one file into a [`ScannedFile`], if it still exists.
fn scan_single(root: &Path, path: &Path) -> Option<ScannedFile> {
    let bytes = std::fs::read(path).ok()?;
    let extension = path.extension()?.to_str()?;
    Some(ScannedFile {
        absolute_path: path.to_path_buf(),
        relative_path: relative_of(root, path),
        size_bytes: bytes.len() as u64,
        content_hash: crate::project::hash_bytes(&bytes),
        language: Language::from_extension(extension),
    })
}

/// Run the watch loop until cancellation: receive coalesced events and
/// drive the coordinator for each.
pub async fn watch_loop(
    indexer: Arc<Indexer>,
    root: PathBuf,
    settings: Arc<Settings>,
    cancel: CancellationToken,
) -> Result<(), WatchError> {
    let mut watcher = FileWatcher::spawn(&root, &settings, cancel.clone())?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            maybe = watcher.events.recv() => {
                let Some(event) = maybe else {
                    return Err(WatchError::ChannelClosed);
                };
                crate::log_event!(
                    "watcher",
                    "change",
                    "{:?} {}",
                    event.kind,
                    event.path.display()
                );
                match apply_change(&indexer, &root, &event).await {
                    Ok(report) => {
                        crate::debug_event!(
                            "watcher",
                            "applied",
                            "{} indexed, {} removed",
                            report.files_indexed,
                            report.files_removed
                        );
                    }
                    Err(e) => {
                        tracing::error!(target: "watcher", "reindex failed: {e}");
                    }
                }
            }
        }
    }
}
