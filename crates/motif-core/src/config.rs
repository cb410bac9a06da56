//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Targets per batch, clamped to `BATCH_SIZE_MAX`.
    pub batch_size: usize,
    /// Worker pool size: concurrent batch executions against the renderer.
    pub max_concurrent_requests: usize,
    /// System-wide running-task capacity used for load calculation.
    pub max_concurrent_tasks: usize,
    /// Maximum retries per batch.
    pub max_retries: u32,
    /// Backoff delay table; attempts beyond the table clamp to the tail.
    pub retry_delays: Vec<Duration>,
    /// Snapshot after this many batches reach a terminal state.
    pub checkpoint_interval: usize,
    /// Load ratio at or above which submissions are rejected.
    pub admission_load_threshold: f64,
    /// Load ratio above which health degrades (observability only).
    pub health_load_threshold: f64,
    /// Pending-work ceiling above which health degrades.
    pub pending_ceiling: usize,
    /// Per-queue failure ratio above which the queue reports unhealthy.
    pub queue_failure_threshold: f64,
    /// Per-queue concurrency ceiling.
    pub queue_concurrency_limit: usize,
    /// Polling interval while waiting for admission.
    pub poll_interval: Duration,
    /// Directory artifacts are written under (per-job subdirectories).
    pub export_dir: PathBuf,
    /// Directory checkpoint snapshots are written to.
    pub checkpoint_dir: PathBuf,
    /// Age in days after which terminal jobs are swept.
    pub retention_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_concurrent_requests: defaults::MAX_CONCURRENT_REQUESTS,
            max_concurrent_tasks: defaults::MAX_CONCURRENT_TASKS,
            max_retries: defaults::MAX_RETRIES,
            retry_delays: defaults::RETRY_DELAY_SECS
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect(),
            checkpoint_interval: defaults::CHECKPOINT_INTERVAL,
            admission_load_threshold: defaults::ADMISSION_LOAD_THRESHOLD,
            health_load_threshold: defaults::HEALTH_LOAD_THRESHOLD,
            pending_ceiling: defaults::PENDING_CEILING,
            queue_failure_threshold: defaults::QUEUE_FAILURE_THRESHOLD,
            queue_concurrency_limit: defaults::QUEUE_CONCURRENCY_LIMIT,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            export_dir: PathBuf::from("./exports"),
            checkpoint_dir: PathBuf::from("./checkpoints"),
            retention_days: defaults::RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MOTIF_BATCH_SIZE` | `6` | Targets per batch (max 20) |
    /// | `MOTIF_MAX_CONCURRENT_REQUESTS` | `3` | Renderer worker pool size |
    /// | `MOTIF_MAX_CONCURRENT_TASKS` | `10` | Load-calculation capacity |
    /// | `MOTIF_MAX_RETRIES` | `3` | Max retries per batch |
    /// | `MOTIF_CHECKPOINT_INTERVAL` | `10` | Terminal batches per snapshot |
    /// | `MOTIF_ADMISSION_LOAD_THRESHOLD` | `0.9` | Admission rejection load |
    /// | `MOTIF_EXPORT_DIR` | `./exports` | Artifact output root |
    /// | `MOTIF_CHECKPOINT_DIR` | `./checkpoints` | Snapshot directory |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("MOTIF_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse::<usize>("MOTIF_MAX_CONCURRENT_REQUESTS") {
            config.max_concurrent_requests = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("MOTIF_MAX_CONCURRENT_TASKS") {
            config.max_concurrent_tasks = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("MOTIF_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<usize>("MOTIF_CHECKPOINT_INTERVAL") {
            config.checkpoint_interval = v.max(1);
        }
        if let Some(v) = env_parse::<f64>("MOTIF_ADMISSION_LOAD_THRESHOLD") {
            config.admission_load_threshold = v;
        }
        if let Ok(v) = std::env::var("MOTIF_EXPORT_DIR") {
            config.export_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MOTIF_CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(v);
        }

        config.clamp()
    }

    /// Set the batch size (clamped to the configured maximum).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self.clamp()
    }

    /// Set the renderer worker pool size.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    /// Set the maximum retries per batch.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the backoff delay table.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Set the checkpoint interval (terminal batches per snapshot).
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Set the artifact output root.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Set the checkpoint snapshot directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    fn clamp(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, defaults::BATCH_SIZE_MAX);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
