//! Centralized default constants for the motif engine.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// BATCHING
// =============================================================================

/// Default number of targets per batch.
pub const BATCH_SIZE: usize = 6;

/// Hard ceiling on the configurable batch size.
pub const BATCH_SIZE_MAX: usize = 20;

// =============================================================================
// RETRY
// =============================================================================

/// Default maximum retries for a failed batch.
pub const MAX_RETRIES: u32 = 3;

/// Backoff delay table in seconds; attempts beyond the table length are
/// clamped to the last entry.
pub const RETRY_DELAY_SECS: [u64; 3] = [2, 4, 8];

// =============================================================================
// CONCURRENCY & ADMISSION
// =============================================================================

/// Default renderer worker pool size (concurrent batch executions).
pub const MAX_CONCURRENT_REQUESTS: usize = 3;

/// System-wide running-task capacity used for load calculation.
pub const MAX_CONCURRENT_TASKS: usize = 10;

/// Load ratio at or above which new submissions are rejected.
pub const ADMISSION_LOAD_THRESHOLD: f64 = 0.9;

/// Load ratio above which the health score starts degrading. Observability
/// only; admission uses `ADMISSION_LOAD_THRESHOLD`.
pub const HEALTH_LOAD_THRESHOLD: f64 = 0.8;

/// Pending-work ceiling above which health degrades.
pub const PENDING_CEILING: usize = 100;

/// Per-queue failure ratio above which the queue is reported unhealthy.
pub const QUEUE_FAILURE_THRESHOLD: f64 = 0.1;

/// Polling interval while waiting for admission or batch completion.
pub const POLL_INTERVAL_MS: u64 = 500;

// =============================================================================
// QUEUES
// =============================================================================

/// Queue for replace-only jobs.
pub const QUEUE_REPLACE: &str = "replace";

/// Queue for export-only jobs.
pub const QUEUE_EXPORT: &str = "export";

/// Queue for combined replace-then-export jobs.
pub const QUEUE_BULK: &str = "bulk";

/// Default per-queue concurrency ceiling.
pub const QUEUE_CONCURRENCY_LIMIT: usize = 5;

// =============================================================================
// CHECKPOINTING & RETENTION
// =============================================================================

/// Snapshot the job after this many batches reach a terminal state.
pub const CHECKPOINT_INTERVAL: usize = 10;

/// Age in days after which terminal jobs are swept.
pub const RETENTION_DAYS: i64 = 7;

// =============================================================================
// EXPORT
// =============================================================================

/// Minimum allowed export scale factor.
pub const SCALE_MIN: f32 = 1.0;

/// Maximum allowed export scale factor.
pub const SCALE_MAX: f32 = 4.0;

/// Maximum number of scale factors per export configuration.
pub const MAX_SCALES: usize = 5;

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the engine's broadcast event channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
