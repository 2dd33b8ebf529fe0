//! Indexer coordinator.
//!
//! Drives a project index through `scanning → parsing → extracting →
//! storing → linking`. Extraction fans out over a bounded blocking
//! worker pool; all database writes are serialized through one writer
//! task fed by a bounded channel, so the store sees exactly one
//! committer. Per-file failures are collected, not fatal, until the
//! configured threshold; cancellation drains in-flight work and
//! returns a partial report.

pub mod progress;

pub use progress::{FileError, IndexPhase, IndexingProgressEvent, IndexingReport};

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::extract::{EntityExtractor, ExtractionResult};
use crate::ident;
use crate::link::{Linker, commit_link_output};
use crate::parsing::UceParser;
use crate::project::{ProjectDetector, ScannedFile, Scanner};
use crate::storage::{GraphStore, Params, SchemaDef, store};
use crate::telemetry::{SpanStatus, Tracer};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Work items for the single writer task.
enum WriteJob {
    /// Replace a file's rows: cascade delete, then insert the batch.
    Upsert(Box<ExtractionResult>),
    /// A file disappeared: cascade delete only.
    Remove(String),
}

pub struct Indexer {
    settings: Arc<Settings>,
    store: Arc<GraphStore>,
    parser: Arc<dyn UceParser>,
    schema: SchemaDef,
    tracer: Tracer,
    progress: broadcast::Sender<IndexingProgressEvent>,
    cancel: CancellationToken,
}

impl Indexer {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<GraphStore>,
        parser: Arc<dyn UceParser>,
    ) -> Self {
        let schema = SchemaDef::core_with_dimensions(settings.storage.embedding_dimensions);
        let (progress, _) = broadcast::channel(256);
        Self {
            settings,
            store,
            parser,
            schema,
            tracer: Tracer::disabled(),
            progress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Subscribe to typed progress events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<IndexingProgressEvent> {
        self.progress.subscribe()
    }

    /// Token observed by every long-running phase.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    fn emit(&self, phase: IndexPhase, current: usize, total: usize, file: Option<&str>) {
        let _ = self.progress.send(IndexingProgressEvent {
            phase,
            current,
            total,
            current_file: file.map(str::to_string),
        });
    }

    /// Relative path → stored content hash, for the scanner's diff.
    pub fn stored_hashes(&self) -> IndexResult<HashMap<String, String>> {
        let rows = self.store.query(
            "?[relative_path, content_hash] := *files{relative_path, content_hash}",
            Params::new(),
        )?;
        let mut map = HashMap::new();
        for i in 0..rows.len() {
            map.insert(
                rows.get_str(i, "relative_path")?.to_string(),
                rows.get_str(i, "content_hash")?.to_string(),
            );
        }
        Ok(map)
    }

    /// Index a whole project rooted at `root`.
    pub async fn index_project(&self, root: &Path) -> IndexResult<IndexingReport> {
        let started = Instant::now();
        let mut span = self.tracer.start_span("index_project");
        span.set_attr("root", root.display().to_string());

        self.emit(IndexPhase::Scanning, 0, 0, None);
        let known = self.stored_hashes()?;
        let settings = Arc::clone(&self.settings);
        let scan_root = root.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || {
            let scanner = Scanner::new(settings);
            scanner.scan(&scan_root, &known)
        })
        .await
        .map_err(|e| IndexError::General(format!("scan task failed: {e}")))?;

        let detected = {
            let detect_root = root.to_path_buf();
            tokio::task::spawn_blocking(move || ProjectDetector::detect(&detect_root))
                .await
                .map_err(|e| IndexError::General(format!("detect task failed: {e}")))??
        };

        crate::log_event!(
            "indexer",
            "scanned",
            "{} added, {} modified, {} unchanged, {} removed in {}ms",
            outcome.diff.added.len(),
            outcome.diff.modified.len(),
            outcome.diff.unchanged.len(),
            outcome.diff.removed.len(),
            outcome.duration_ms
        );

        let dirty: Vec<ScannedFile> = outcome.diff.dirty().cloned().collect();
        let unchanged = outcome.diff.unchanged.len();
        let removed = outcome.diff.removed.clone();

        let mut report = self
            .run_pipeline(dirty, removed, detected.framework.as_deref())
            .await?;
        report.files_unchanged = unchanged;
        report.total_time_ms = started.elapsed().as_millis() as u64;

        span.set_attr("files_indexed", report.files_indexed as u64);
        span.set_attr("files_failed", report.files_failed as u64);
        span.set_status(if report.success() {
            SpanStatus::Ok
        } else {
            SpanStatus::Error(format!("{} file failures", report.files_failed))
        });
        span.end();
        self.tracer.flush();

        Ok(report)
    }

    /// Index an explicit change set (the watcher's entry point).
    pub async fn index_files(
        &self,
        changed: Vec<ScannedFile>,
        removed: Vec<String>,
    ) -> IndexResult<IndexingReport> {
        let started = Instant::now();
        let mut report = self.run_pipeline(changed, removed, None).await?;
        report.total_time_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Phases parsing → extracting → storing → linking over a change set.
    async fn run_pipeline(
        &self,
        dirty: Vec<ScannedFile>,
        removed: Vec<String>,
        framework: Option<&str>,
    ) -> IndexResult<IndexingReport> {
        let mut report = IndexingReport::default();
        let total = dirty.len();
        let threshold = self.settings.indexing.failure_threshold;

        let (job_tx, job_rx) =
            mpsc::channel::<WriteJob>(self.settings.indexing.write_queue_capacity);

        // Single writer task: the only committer for this store.
        let writer = {
            let store = Arc::clone(&self.store);
            let schema = self.schema.clone();
            let progress = self.progress.clone();
            let mut rx = job_rx;
            tokio::task::spawn_blocking(move || {
                let mut results: Vec<ExtractionResult> = Vec::new();
                let mut errors: Vec<FileError> = Vec::new();
                let mut removed_count = 0usize;
                let mut stored = 0usize;

                while let Some(job) = rx.blocking_recv() {
                    match job {
                        WriteJob::Upsert(result) => {
                            let surviving: Vec<_> = result
                                .batch
                                .entity_ids()
                                .into_iter()
                                .map(|(id, _)| id)
                                .collect();
                            let commit = store.with_transaction(|tx| {
                                store::delete_file_cascade(tx, &result.file_id, &surviving)?;
                                store::put_batch(tx, &schema, &result.batch)
                            });
                            match commit {
                                Ok(()) => {
                                    stored += 1;
                                    let _ = progress.send(IndexingProgressEvent {
                                        phase: IndexPhase::Storing,
                                        current: stored,
                                        total: 0,
                                        current_file: Some(result.relative_path.clone()),
                                    });
                                    results.push(*result);
                                }
                                Err(e) => errors.push(FileError {
                                    file: result.relative_path.clone(),
                                    error: e.to_string(),
                                }),
                            }
                        }
                        WriteJob::Remove(path) => {
                            let file_id = ident::file_id(&path);
                            match store.with_transaction(|tx| {
                                store::delete_file_cascade(tx, &file_id, &[])
                            }) {
                                Ok(()) => removed_count += 1,
                                Err(e) => errors.push(FileError {
                                    file: path,
                                    error: e.to_string(),
                                }),
                            }
                        }
                    }
                }
                (results, errors, removed_count)
            })
        };

        for path in removed {
            if job_tx.send(WriteJob::Remove(path)).await.is_err() {
                break;
            }
        }

        // Extraction fan-out: bounded blocking pool, results funneled to
        // the writer. Parsing happens on the same workers.
        self.emit(IndexPhase::Parsing, 0, total, None);
        let pool = Arc::new(Semaphore::new(self.settings.indexing.parallel_threads.max(1)));
        let mut worker_errors: Vec<FileError> = Vec::new();
        let mut workers = Vec::new();

        for (i, file) in dirty.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.emit(
                IndexPhase::Extracting,
                i + 1,
                total,
                Some(&file.relative_path),
            );

            let permit = Arc::clone(&pool)
                .acquire_owned()
                .await
                .map_err(|e| IndexError::General(format!("worker pool closed: {e}")))?;
            let parser = Arc::clone(&self.parser);
            let tx = job_tx.clone();
            let framework = framework.map(str::to_string);

            workers.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = extract_one(&parser, &file, framework.as_deref());
                match result {
                    Ok(extraction) => {
                        let _ = tx.blocking_send(WriteJob::Upsert(Box::new(extraction)));
                        None
                    }
                    Err(e) => Some(FileError {
                        file: file.relative_path.clone(),
                        error: e.to_string(),
                    }),
                }
            }));
        }

        for worker in workers {
            if let Ok(Some(error)) = worker.await {
                tracing::warn!(target: "indexer", "{}: {}", error.file, error.error);
                worker_errors.push(error);
            }
        }
        drop(job_tx);

        let (results, write_errors, removed_count) = writer
            .await
            .map_err(|e| IndexError::General(format!("writer task failed: {e}")))?;

        report.files_indexed = results.len();
        report.files_removed = removed_count;
        report.errors.extend(worker_errors);
        report.errors.extend(write_errors);
        report.files_failed = report.errors.len();

        if report.files_failed > threshold {
            return Err(IndexError::FailureThresholdExceeded {
                failed: report.files_failed,
                threshold,
            });
        }

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        // Linking: resolution is parallel (the registry is read-only by
        // now); commits stay serialized, one transaction per file.
        self.emit(IndexPhase::Linking, 0, report.files_indexed, None);
        let link_span = self.tracer.start_span("link");
        let store = Arc::clone(&self.store);
        let schema = self.schema.clone();
        let (link_outputs, link_errors) = tokio::task::spawn_blocking(move || {
            let linker = match Linker::from_store(&store, &results) {
                Ok(linker) => linker,
                Err(e) => return (Vec::new(), vec![FileError {
                    file: "<registry>".to_string(),
                    error: e.to_string(),
                }]),
            };
            let outputs: Vec<_> = results
                .par_iter()
                .map(|r| (r.relative_path.clone(), linker.link_file(r)))
                .collect();

            let mut errors = Vec::new();
            let mut committed = Vec::new();
            for (path, output) in outputs {
                match commit_link_output(&store, &schema, &output) {
                    Ok(()) => committed.push(output),
                    Err(e) => errors.push(FileError {
                        file: path,
                        error: e.to_string(),
                    }),
                }
            }
            (committed, errors)
        })
        .await
        .map_err(|e| IndexError::General(format!("link task failed: {e}")))?;
        link_span.end();

        for output in &link_outputs {
            report.calls_resolved += output.resolved_calls;
            report.ghost_refs += output.ghost_refs;
            for diag in &output.diagnostics {
                tracing::debug!(
                    target: "linker",
                    "ambiguity in {} at line {}: {}",
                    diag.relative_path,
                    diag.line,
                    diag.name
                );
            }
        }
        report.errors.extend(link_errors);
        report.files_failed = report.errors.len();

        // Compaction: drop ghosts nothing references any more.
        report.ghosts_collected = store::collect_ghosts(&self.store)?;

        Ok(report)
    }
}

/// Read, parse and extract one file on a blocking worker.
fn extract_one(
    parser: &Arc<dyn UceParser>,
    file: &ScannedFile,
    framework: Option<&str>,
) -> IndexResult<ExtractionResult> {
    let bytes = std::fs::read(&file.absolute_path).map_err(|source| IndexError::FileRead {
        path: file.absolute_path.clone(),
        source,
    })?;
    let source = String::from_utf8_lossy(&bytes);

    // Re-hash at read time so stored rows always correspond to the
    // bytes they were derived from, even if the file moved under us
    // between scan and extract.
    let mut file = file.clone();
    file.content_hash = crate::project::hash_bytes(&bytes);
    file.size_bytes = bytes.len() as u64;

    let tree = parser
        .parse_file(&file.absolute_path, &source, file.language)
        .map_err(|e| IndexError::ParseFailure {
            path: file.absolute_path.clone(),
            reason: e.to_string(),
        })?;

    EntityExtractor::new().extract(&file, &tree, framework)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{StaticParser, UceFunction, UceTree};
    use crate::storage::MigrationRunner;
    use crate::types::Range;
    use std::fs;
    use tempfile::TempDir;

    fn test_indexer(parser: StaticParser) -> (Indexer, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::in_memory().unwrap();
        MigrationRunner::core(8).migrate_to_latest(&store).unwrap();
        let mut settings = Settings::default();
        settings.storage.embedding_dimensions = 8;
        settings.indexing.parallel_threads = 2;
        let indexer = Indexer::new(
            Arc::new(settings),
            Arc::new(store),
            Arc::new(parser),
        );
        (indexer, dir)
    }

    fn greet_tree() -> UceTree {
        UceTree {
            functions: vec![
                UceFunction::new("greet", Range::new(1, 0, 3, 1))
                    .with_params(vec![crate::parsing::UceParam::new("name", Some("string"))]),
            ],
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_index_commits_rows() {
        let parser = StaticParser::new().with_tree("src/util.ts", greet_tree());
        let (indexer, dir) = test_indexer(parser);

        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/util.ts"), "function greet() {}").unwrap();

        let report = indexer.index_project(dir.path()).await.unwrap();
        assert!(report.success());
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_failed, 0);

        let rows = indexer
            .store()
            .query("?[id] := *functions{id}", Params::new())
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reindexing_unchanged_project_is_a_noop() {
        let parser = StaticParser::new().with_tree("src/util.ts", greet_tree());
        let (indexer, dir) = test_indexer(parser);
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/util.ts"), "function greet() {}").unwrap();

        let first = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(first.files_indexed, 1);

        let second = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_unchanged, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parse_failures_are_collected_not_fatal() {
        // Parser knows no trees: every file fails to parse.
        let parser = StaticParser::new();
        let (indexer, dir) = test_indexer(parser);
        fs::write(dir.path().join("a.ts"), "x").unwrap();

        let report = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_failed, 1);
        assert!(!report.success());
        assert!(report.errors[0].error.contains("parse"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_threshold_aborts() {
        let parser = StaticParser::new();
        let dir = TempDir::new().unwrap();
        let store = GraphStore::in_memory().unwrap();
        MigrationRunner::core(8).migrate_to_latest(&store).unwrap();
        let mut settings = Settings::default();
        settings.storage.embedding_dimensions = 8;
        settings.indexing.failure_threshold = 0;
        let indexer = Indexer::new(Arc::new(settings), Arc::new(store), Arc::new(parser));

        fs::write(dir.path().join("a.ts"), "x").unwrap();
        let err = indexer.index_project(dir.path()).await.unwrap_err();
        assert!(matches!(err, IndexError::FailureThresholdExceeded { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removed_files_cascade_delete() {
        let parser = StaticParser::new().with_tree("src/util.ts", greet_tree());
        let (indexer, dir) = test_indexer(parser);
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let file_path = dir.path().join("src/util.ts");
        fs::write(&file_path, "function greet() {}").unwrap();

        indexer.index_project(dir.path()).await.unwrap();
        fs::remove_file(&file_path).unwrap();

        let report = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(report.files_removed, 1);

        let functions = indexer
            .store()
            .query("?[id] := *functions{id}", Params::new())
            .unwrap();
        assert!(functions.is_empty());
        let files = indexer
            .store()
            .query("?[id] := *files{id}", Params::new())
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn progress_events_are_broadcast() {
        let parser = StaticParser::new().with_tree("src/util.ts", greet_tree());
        let (indexer, dir) = test_indexer(parser);
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/util.ts"), "function greet() {}").unwrap();

        let mut progress = indexer.subscribe_progress();
        indexer.index_project(dir.path()).await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = progress.try_recv() {
            phases.push(event.phase);
        }
        assert!(phases.contains(&IndexPhase::Scanning));
        assert!(phases.contains(&IndexPhase::Extracting));
        assert!(phases.contains(&IndexPhase::Storing));
        assert!(phases.contains(&IndexPhase::Linking));
    }
}
