use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level daemon configuration. One TOML file, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ButlerConfig {
    pub paths: PathsConfig,
    pub discovery: DiscoveryConfig,
    pub classification: ClassificationConfig,
    pub retries: RetryConfig,
    pub resources: ResourceConfig,
}

/// Library and working directories. All must be absolute.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root under which one uppercase folder per confirmed series is kept.
    pub library_root: PathBuf,
    /// Directories the watcher observes for incoming downloads.
    pub watch_folders: Vec<PathBuf>,
    /// Holding area for files awaiting user review.
    pub pending_review: PathBuf,
    /// Classifier model directory; read-only to the pipeline.
    pub models_path: PathBuf,
    /// Location of the embedded database file.
    pub database_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            library_root: PathBuf::from("/media/library"),
            watch_folders: vec![PathBuf::from("/media/incoming")],
            pending_review: PathBuf::from("/media/pending"),
            models_path: PathBuf::from("/var/lib/mediabutler/models"),
            database_path: PathBuf::from("/var/lib/mediabutler/mediabutler.db"),
        }
    }
}

fn default_file_extensions() -> Vec<String> {
    [".mkv", ".mp4", ".avi", ".m4v", ".mov", ".ts", ".wmv"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    // Partial downloads and torrent workspace markers.
    [r"\.part$", r"\.!qB$", r"\.tmp$", r"(?i)sample"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Filesystem discovery tuning for the watcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Extensions treated as video assets; leading dot, case-insensitive.
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
    /// Regexes that suppress discovery, e.g. partial-download markers.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// Files below this size are ignored (junk and samples).
    pub min_file_size_mb: u64,
    /// Quiet window before a changed path is emitted as a discovery.
    pub debounce_seconds: u64,
    /// Cadence of the full-folder compensation scan.
    pub scan_interval_minutes: u64,
    /// Bound on concurrently hashed discoveries.
    pub max_concurrent_scans: usize,
    /// Disable to run on periodic scans alone (network mounts without
    /// reliable inotify).
    pub enable_event_watcher: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            file_extensions: default_file_extensions(),
            exclude_patterns: default_exclude_patterns(),
            min_file_size_mb: 50,
            debounce_seconds: 3,
            scan_interval_minutes: 5,
            max_concurrent_scans: 2,
            enable_event_watcher: true,
        }
    }
}

/// Confidence gates and classifier call budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// At or above this confidence the suggestion is presented as settled
    /// (auto-confirm itself stays off under current policy).
    pub auto_threshold: f64,
    /// At or above this confidence alternatives are offered; below it the
    /// suggestion is UNKNOWN and the user must supply a category.
    pub suggest_threshold: f64,
    /// Deadline for a single classifier call.
    pub max_classification_ms: u64,
    /// Cap on returned alternative categories.
    pub max_alternatives: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            auto_threshold: 0.85,
            suggest_threshold: 0.50,
            max_classification_ms: 500,
            max_alternatives: 3,
        }
    }
}

/// Retry, queue, and batch bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transient failures per file before the row parks at ERROR.
    pub max_retry: u32,
    /// Backoff schedule indexed by attempt; the last entry repeats.
    pub retry_delays_ms: Vec<u64>,
    /// Bounded job queue capacity.
    pub queue_capacity: usize,
    /// Worker tasks draining the queue.
    pub worker_count: usize,
    /// When true a full queue blocks producers instead of rejecting.
    pub queue_block_when_full: bool,
    /// Hard cap on files per batch request.
    pub max_batch_size: usize,
    /// Files organized concurrently inside one batch.
    pub max_batch_concurrency: usize,
    /// Grace period for in-flight jobs at shutdown.
    pub shutdown_timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            retry_delays_ms: vec![5_000, 30_000, 60_000],
            queue_capacity: 100,
            worker_count: 2,
            queue_block_when_full: false,
            max_batch_size: 50,
            max_batch_concurrency: 2,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Memory guard rails for the ARM32 target.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Resident-set ceiling the daemon logs warnings against.
    pub memory_threshold_mb: u64,
    /// Advisory level at which caches are shed.
    pub auto_gc_trigger_mb: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 300,
            auto_gc_trigger_mb: 250,
        }
    }
}
