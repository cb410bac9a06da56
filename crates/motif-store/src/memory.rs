//! In-memory `JobStore` implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use motif_core::{Batch, BatchStatus, Error, Job, JobStatus, JobStore, Result};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    batches: HashMap<Uuid, Batch>,
    /// Batch ids per job, in partition (index) order.
    job_batches: HashMap<Uuid, Vec<Uuid>>,
}

/// In-memory job registry for single-process deployments.
///
/// All mutations go through one write lock, giving the single-writer
/// semantics the data-model invariants assume. A multi-worker deployment
/// replaces this with a transactional store behind the same trait.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.write().await;
        debug!(job_id = %job.id, "Inserting job");
        inner.job_batches.entry(job.id).or_default();
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn put_job(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(Error::JobNotFound(job.id));
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn compare_and_swap_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        if job.status != expected {
            return Ok(false);
        }
        job.status = next;
        match next {
            JobStatus::Processing if job.started_at.is_none() => {
                job.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => {
                job.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(true)
    }

    async fn insert_batches(&self, batches: Vec<Batch>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for batch in batches {
            inner
                .job_batches
                .entry(batch.job_id)
                .or_default()
                .push(batch.id);
            inner.batches.insert(batch.id, batch);
        }
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>> {
        let inner = self.inner.read().await;
        Ok(inner.batches.get(&batch_id).cloned())
    }

    async fn put_batch(&self, batch: Batch) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.batches.contains_key(&batch.id) {
            return Err(Error::BatchNotFound(batch.id));
        }
        inner.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn batches_for_job(&self, job_id: Uuid) -> Result<Vec<Batch>> {
        let inner = self.inner.read().await;
        let ids = inner
            .job_batches
            .get(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        let mut batches: Vec<Batch> = ids
            .iter()
            .filter_map(|id| inner.batches.get(id).cloned())
            .collect();
        batches.sort_by_key(|b| b.index);
        Ok(batches)
    }

    async fn record_batch_terminal(&self, batch: Batch) -> Result<Job> {
        let mut inner = self.inner.write().await;
        let previous = inner
            .batches
            .get(&batch.id)
            .map(|b| b.status)
            .ok_or(Error::BatchNotFound(batch.id))?;
        let job_id = batch.job_id;
        let next = batch.status;
        inner.batches.insert(batch.id, batch);

        let job = inner.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        // Count only the first terminal transition, keeping counters
        // monotonic even if an executor reports twice.
        if !previous.is_terminal() {
            match next {
                BatchStatus::Completed => job.completed_batches += 1,
                BatchStatus::Failed => job.failed_batches += 1,
                BatchStatus::Cancelled => {}
                _ => {
                    return Err(Error::Internal(
                        "record_batch_terminal called with non-terminal status".into(),
                    ))
                }
            }
        } else {
            warn!(job_id = %job_id, "Duplicate terminal report for batch ignored");
        }
        debug_assert!(job.completed_batches + job.failed_batches <= job.total_batches);
        Ok(job.clone())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn remove_job(&self, job_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.jobs.remove(&job_id).is_some();
        if let Some(batch_ids) = inner.job_batches.remove(&job_id) {
            for id in batch_ids {
                inner.batches.remove(&id);
            }
        }
        Ok(existed)
    }

    async fn terminal_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.status.is_terminal() && j.completed_at.map_or(false, |t| t < cutoff)
            })
            .map(|j| j.id)
            .collect())
    }

    /// Re-open a failed batch for an operator-requested retry: status back
    /// to `Pending`, retry budget reset, and the owning job's failed
    /// counter decremented. This is the one deliberate exception to the
    /// counters' monotonicity, taken only on an explicit retry request.
    async fn reopen_batch(&self, batch_id: Uuid) -> Result<Batch> {
        let mut inner = self.inner.write().await;
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))?;
        if batch.status != BatchStatus::Failed {
            return Err(Error::Internal(format!(
                "batch {} is not failed, cannot reopen",
                batch_id
            )));
        }
        batch.status = BatchStatus::Pending;
        batch.retry_count = 0;
        batch.error = None;
        batch.started_at = None;
        batch.completed_at = None;
        let reopened = batch.clone();
        let job_id = reopened.job_id;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.failed_batches = job.failed_batches.saturating_sub(1);
        }
        Ok(reopened)
    }
}
