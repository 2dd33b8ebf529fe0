//! Configuration module for the code knowledge engine.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.synapta/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `SYNAPTA_` and use double
//! underscores to separate nested levels:
//! - `SYNAPTA_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `SYNAPTA_WATCHER__DEBOUNCE_MS=500` sets `watcher.debounce_ms`
//! - `SYNAPTA_STORAGE__ENGINE=mem` sets `storage.engine`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Store and cache locations, engine selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Indexing pipeline configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Filesystem watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Semantic analyzer defaults
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Feedback loop tuning
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the key/value engine files and the access marker
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory for cached semantic-analysis results
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Storage engine: "sqlite" (durable, default) or "mem" (tests)
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Fixed dimensionality of stored embedding vectors
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of parallel extraction workers
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Files larger than this are skipped with a diagnostic
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Patterns to ignore during scanning
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Abort an indexing run after this many per-file failures
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Capacity of the batch channel feeding the single writer task
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Debounce window for coalescing bursts of events on one path
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum buffered events while the coordinator is busy
    #[serde(default = "default_buffer_cap")]
    pub buffer_cap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Wall-clock budget per analyzer invocation
    #[serde(default = "default_analyzer_timeout_ms")]
    pub timeout_ms: u64,

    /// Data-flow: how deep to follow call results
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u32,

    /// Data-flow: tag externally-derived values
    #[serde(default = "default_true")]
    pub track_taint: bool,

    /// Data-flow: include literal nodes
    #[serde(default = "default_false")]
    pub include_literals: bool,

    /// Data-flow: follow property reads/writes
    #[serde(default = "default_true")]
    pub analyze_properties: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedbackConfig {
    /// Rolling outcome window
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Interval between recalculate ticks
    #[serde(default = "default_recalc_interval_secs")]
    pub recalc_interval_secs: u64,

    /// Minimum samples before a model earns an adjustment
    #[serde(default = "default_min_samples")]
    pub min_samples_for_adjustment: usize,

    /// Success rate below this draws a score penalty
    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,

    /// p90 latency above this draws a score penalty
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,

    /// Fraction of each adjustment's magnitude removed per tick
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error | warn | info | debug | trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `indexer = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_store_path() -> PathBuf {
    PathBuf::from(".synapta/store")
}
fn default_cache_path() -> PathBuf {
    PathBuf::from(".synapta/cache")
}
fn default_engine() -> String {
    "sqlite".to_string()
}
fn default_embedding_dimensions() -> usize {
    384
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_max_file_size() -> u64 {
    1_048_576
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        "target/**".to_string(),
        "node_modules/**".to_string(),
        "dist/**".to_string(),
        ".git/**".to_string(),
        "*.generated.*".to_string(),
        "*.min.js".to_string(),
    ]
}
fn default_failure_threshold() -> usize {
    50
}
fn default_write_queue_capacity() -> usize {
    64
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_buffer_cap() -> usize {
    1024
}
fn default_analyzer_timeout_ms() -> u64 {
    5_000
}
fn default_max_call_depth() -> u32 {
    5
}
fn default_window_secs() -> u64 {
    3_600
}
fn default_recalc_interval_secs() -> u64 {
    300
}
fn default_min_samples() -> usize {
    10
}
fn default_success_rate_threshold() -> f64 {
    0.9
}
fn default_latency_threshold_ms() -> u64 {
    5_000
}
fn default_decay_rate() -> f64 {
    0.1
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            indexing: IndexingConfig::default(),
            watcher: WatcherConfig::default(),
            analysis: AnalysisConfig::default(),
            feedback: FeedbackConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            cache_path: default_cache_path(),
            engine: default_engine(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            max_file_size_bytes: default_max_file_size(),
            ignore_patterns: default_ignore_patterns(),
            failure_threshold: default_failure_threshold(),
            write_queue_capacity: default_write_queue_capacity(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            buffer_cap: default_buffer_cap(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_analyzer_timeout_ms(),
            max_call_depth: default_max_call_depth(),
            track_taint: true,
            include_literals: false,
            analyze_properties: true,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            recalc_interval_secs: default_recalc_interval_secs(),
            min_samples_for_adjustment: default_min_samples(),
            success_rate_threshold: default_success_rate_threshold(),
            latency_threshold_ms: default_latency_threshold_ms(),
            decay_rate: default_decay_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".synapta/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore becomes a dot; single underscores stay
            // inside field names.
            .merge(Env::prefixed("SYNAPTA_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Find the workspace root by looking for a `.synapta` directory,
    /// searching from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".synapta");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Get the workspace root directory (where `.synapta` is located).
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            if ancestor.join(".synapta").is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }
        None
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SYNAPTA_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file under `.synapta/`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(".synapta/settings.toml");
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use force to overwrite".into());
        }
        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.storage.engine, "sqlite");
        assert_eq!(settings.storage.embedding_dimensions, 384);
        assert!(settings.indexing.parallel_threads > 0);
        assert_eq!(settings.watcher.debounce_ms, 250);
        assert_eq!(settings.feedback.min_samples_for_adjustment, 10);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[storage]
engine = "mem"
embedding_dimensions = 768

[indexing]
parallel_threads = 4
ignore_patterns = ["custom/**"]

[watcher]
debounce_ms = 100

[feedback]
min_samples_for_adjustment = 5
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.storage.engine, "mem");
        assert_eq!(settings.storage.embedding_dimensions, 768);
        assert_eq!(settings.indexing.parallel_threads, 4);
        assert_eq!(settings.indexing.ignore_patterns, vec!["custom/**"]);
        assert_eq!(settings.watcher.debounce_ms, 100);
        assert_eq!(settings.feedback.min_samples_for_adjustment, 5);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        fs::write(&config_path, "[indexing]\nparallel_threads = 16\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.indexing.parallel_threads, 16);
        // Defaults survive alongside the override.
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watcher.debounce_ms, 250);
        assert_eq!(settings.analysis.max_call_depth, 5);
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 2;
        settings.watcher.debounce_ms = 125;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.indexing.parallel_threads, 2);
        assert_eq!(loaded.watcher.debounce_ms, 125);
    }
}
