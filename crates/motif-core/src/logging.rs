//! Structured logging field name constants for the motif engine.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, job/batch completions |
//! | DEBUG | Decision points, admission outcomes, retry scheduling |
//! | TRACE | Per-target iteration, high-volume data |

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Batch UUID being executed.
pub const BATCH_ID: &str = "batch_id";

/// Batch index within its job.
pub const BATCH_INDEX: &str = "batch_index";

/// Queue name a batch was submitted to.
pub const QUEUE: &str = "queue";

/// Logical operation name.
/// Examples: "submit_job", "execute_batch", "snapshot", "resolve"
pub const OPERATION: &str = "op";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of targets touched by an operation.
pub const TARGET_COUNT: &str = "target_count";

/// 1-indexed attempt number of a batch execution.
pub const ATTEMPT: &str = "attempt";

/// Current system load ratio (running / capacity).
pub const SYSTEM_LOAD: &str = "system_load";
