//! Retention sweep for terminal jobs.
//!
//! Terminal jobs (and their batches and checkpoint snapshots) are only
//! destroyed here, after a configurable age.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use motif_core::{JobStore, Result};

use crate::checkpoint::Checkpointer;

/// Remove terminal jobs older than `max_age_days`, cascading to their
/// batches and checkpoint snapshots. Returns the number of jobs removed.
pub async fn sweep(
    store: &dyn JobStore,
    checkpointer: &Checkpointer,
    max_age_days: i64,
) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(max_age_days);
    let expired = store.terminal_jobs_older_than(cutoff).await?;
    let mut removed = 0;

    for job_id in expired {
        if store.remove_job(job_id).await? {
            removed += 1;
        }
        if let Err(e) = checkpointer.remove(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to remove checkpoint during sweep");
        }
    }

    if removed > 0 {
        info!(removed, max_age_days, "Retention sweep removed terminal jobs");
    }
    Ok(removed)
}
