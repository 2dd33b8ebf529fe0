//! Source file scanner: walk, hash, diff.
//!
//! Walks the project root honoring gitignore rules and configured
//! ignore patterns, hashes candidate files in parallel and computes the
//! change set against previously stored content hashes. Files over the
//! size cap are skipped with a diagnostic.

use crate::config::Settings;
use crate::types::Language;
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// SHA-256 hex digest of raw content. The one hash function used for
/// change detection everywhere.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// One candidate file with its identity and content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub language: Language,
}

/// Why a candidate file was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Larger than `indexing.max_file_size_bytes`.
    FileTooLarge { size: u64, cap: u64 },
    /// Could not be read.
    Unreadable { error: String },
}

#[derive(Debug, Clone)]
pub struct ScanDiagnostic {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Change set against the previously stored hashes.
#[derive(Debug, Default)]
pub struct ScanDiff {
    pub added: Vec<ScannedFile>,
    pub modified: Vec<ScannedFile>,
    pub unchanged: Vec<ScannedFile>,
    /// Relative paths that were stored but no longer exist on disk.
    pub removed: Vec<String>,
}

impl ScanDiff {
    /// Files whose rows need re-extraction.
    pub fn dirty(&self) -> impl Iterator<Item = &ScannedFile> {
        self.added.iter().chain(self.modified.iter())
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub diff: ScanDiff,
    pub diagnostics: Vec<ScanDiagnostic>,
    pub duration_ms: u64,
}

pub struct Scanner {
    settings: Arc<Settings>,
}

impl Scanner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk `root` and produce the change set against `known_hashes`
    /// (relative path → content hash from the stored file rows).
    pub fn scan(
        &self,
        root: &Path,
        known_hashes: &HashMap<String, String>,
    ) -> ScanOutcome {
        let started = Instant::now();
        let candidates = self.walk(root);

        let cap = self.settings.indexing.max_file_size_bytes;
        let results: Vec<Result<ScannedFile, ScanDiagnostic>> = candidates
            .par_iter()
            .map(|path| Self::read_one(root, path, cap))
            .collect();

        let mut diagnostics = Vec::new();
        let mut diff = ScanDiff::default();
        let mut seen: Vec<&str> = Vec::new();

        let mut scanned = Vec::new();
        for result in results {
            match result {
                Ok(file) => scanned.push(file),
                Err(diag) => diagnostics.push(diag),
            }
        }
        // Deterministic order regardless of worker scheduling.
        scanned.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        for file in scanned {
            match known_hashes.get(&file.relative_path) {
                None => diff.added.push(file),
                Some(known) if *known != file.content_hash => diff.modified.push(file),
                Some(_) => diff.unchanged.push(file),
            }
        }
        seen.extend(diff.added.iter().map(|f| f.relative_path.as_str()));
        seen.extend(diff.modified.iter().map(|f| f.relative_path.as_str()));
        seen.extend(diff.unchanged.iter().map(|f| f.relative_path.as_str()));

        for known in known_hashes.keys() {
            if !seen.contains(&known.as_str()) {
                diff.removed.push(known.clone());
            }
        }
        diff.removed.sort();

        for diag in &diagnostics {
            if let SkipReason::FileTooLarge { size, cap } = diag.reason {
                tracing::warn!(
                    target: "scanner",
                    "skipping '{}': {size} bytes exceeds cap {cap}",
                    diag.path.display()
                );
            }
        }

        ScanOutcome {
            diff,
            diagnostics,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Walk the root applying gitignore rules and configured ignores.
    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                tracing::warn!(target: "scanner", "invalid ignore pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                let ext = path.extension()?.to_str()?;
                if Language::from_extension(ext) == Language::Unknown {
                    return None;
                }
                Some(path.to_path_buf())
            })
            .collect()
    }

    fn read_one(
        root: &Path,
        path: &Path,
        cap: u64,
    ) -> Result<ScannedFile, ScanDiagnostic> {
        let size = std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| ScanDiagnostic {
                path: path.to_path_buf(),
                reason: SkipReason::Unreadable {
                    error: e.to_string(),
                },
            })?;
        // At the cap the file still indexes; only strictly-over is skipped.
        if size > cap {
            return Err(ScanDiagnostic {
                path: path.to_path_buf(),
                reason: SkipReason::FileTooLarge { size, cap },
            });
        }

        let bytes = std::fs::read(path).map_err(|e| ScanDiagnostic {
            path: path.to_path_buf(),
            reason: SkipReason::Unreadable {
                error: e.to_string(),
            },
        })?;

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();

        Ok(ScannedFile {
            absolute_path: path.to_path_buf(),
            relative_path: relative,
            size_bytes: size,
            content_hash: hash_bytes(&bytes),
            language: Language::from_extension(&extension),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_eq!(hash_bytes(b"abc").len(), 64);
    }

    #[test]
    fn fresh_scan_reports_all_as_added() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        fs::write(dir.path().join("b.ts"), "export const b = 2;").unwrap();
        fs::write(dir.path().join("notes.md"), "# ignored").unwrap();

        let scanner = Scanner::new(settings());
        let outcome = scanner.scan(dir.path(), &HashMap::new());

        assert_eq!(outcome.diff.added.len(), 2);
        assert!(outcome.diff.modified.is_empty());
        assert!(outcome.diff.removed.is_empty());
    }

    #[test]
    fn unchanged_and_modified_split_by_hash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "one").unwrap();
        fs::write(dir.path().join("b.ts"), "two").unwrap();

        let mut known = HashMap::new();
        known.insert("a.ts".to_string(), hash_bytes(b"one"));
        known.insert("b.ts".to_string(), hash_bytes(b"stale"));
        known.insert("gone.ts".to_string(), hash_bytes(b"x"));

        let scanner = Scanner::new(settings());
        let outcome = scanner.scan(dir.path(), &known);

        assert_eq!(outcome.diff.unchanged.len(), 1);
        assert_eq!(outcome.diff.modified.len(), 1);
        assert_eq!(outcome.diff.modified[0].relative_path, "b.ts");
        assert_eq!(outcome.diff.removed, vec!["gone.ts".to_string()]);
    }

    #[test]
    fn oversized_file_is_skipped_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.indexing.max_file_size_bytes = 8;
        fs::write(dir.path().join("big.ts"), "0123456789abcdef").unwrap();
        fs::write(dir.path().join("ok.ts"), "12345678").unwrap();

        let scanner = Scanner::new(Arc::new(settings));
        let outcome = scanner.scan(dir.path(), &HashMap::new());

        assert_eq!(outcome.diff.added.len(), 1, "file at the cap still indexes");
        assert_eq!(outcome.diff.added[0].relative_path, "ok.ts");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(matches!(
            outcome.diagnostics[0].reason,
            SkipReason::FileTooLarge { size: 16, cap: 8 }
        ));
    }

    #[test]
    fn ignore_patterns_are_applied() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.path().join("app.js"), "y").unwrap();

        let scanner = Scanner::new(settings());
        let outcome = scanner.scan(dir.path(), &HashMap::new());

        assert_eq!(outcome.diff.added.len(), 1);
        assert_eq!(outcome.diff.added[0].relative_path, "app.js");
    }

    #[test]
    fn gitignore_respected_without_git_repo() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "ignored.ts\n").unwrap();
        fs::write(dir.path().join("ignored.ts"), "a").unwrap();
        fs::write(dir.path().join("kept.ts"), "b").unwrap();

        let scanner = Scanner::new(settings());
        let outcome = scanner.scan(dir.path(), &HashMap::new());
        assert_eq!(outcome.diff.added.len(), 1);
        assert_eq!(outcome.diff.added[0].relative_path, "kept.ts");
    }
}
