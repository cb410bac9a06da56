//! Checkpoint persistence: JSON snapshots of terminal batch ids per job.
//!
//! A snapshot is derived from the store, so it inherits the counters'
//! monotonicity: a later snapshot never lists fewer terminal batches than
//! an earlier one for the same job. Restart recovery loads the snapshot
//! and skips re-executing any batch it lists.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use motif_core::{BatchStatus, JobSnapshot, JobStore, Result};

/// Writes and reads per-job snapshot files under a checkpoint directory.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot file path for a job.
    pub fn path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    /// Serialize the job's current terminal batch ids to durable storage.
    pub async fn snapshot(&self, store: &dyn JobStore, job_id: Uuid) -> Result<JobSnapshot> {
        let batches = store.batches_for_job(job_id).await?;
        let mut snapshot = JobSnapshot {
            last_update: Some(Utc::now()),
            ..Default::default()
        };
        for batch in &batches {
            match batch.status {
                BatchStatus::Completed => snapshot.completed_batch_ids.push(batch.id),
                BatchStatus::Failed => snapshot.failed_batch_ids.push(batch.id),
                _ => {}
            }
        }
        snapshot.completed_count = snapshot.completed_batch_ids.len();
        snapshot.failed_count = snapshot.failed_batch_ids.len();

        tokio::fs::create_dir_all(&self.dir).await?;
        let payload = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(self.path(job_id), payload).await?;
        debug!(
            job_id = %job_id,
            completed = snapshot.completed_count,
            failed = snapshot.failed_count,
            "Checkpoint written"
        );
        Ok(snapshot)
    }

    /// Load the persisted snapshot for a job, if one exists.
    pub async fn load(&self, job_id: Uuid) -> Result<Option<JobSnapshot>> {
        let path = self.path(job_id);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        let snapshot: JobSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            job_id = %job_id,
            completed = snapshot.completed_count,
            failed = snapshot.failed_count,
            "Checkpoint loaded"
        );
        Ok(Some(snapshot))
    }

    /// Remove a job's snapshot (retention sweep).
    pub async fn remove(&self, job_id: Uuid) -> Result<()> {
        let path = self.path(job_id);
        if Path::new(&path).exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}
