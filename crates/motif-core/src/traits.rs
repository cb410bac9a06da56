//! Trait definitions for store and collaborator boundaries.
//!
//! The engine talks to durable state through [`JobStore`] and to external
//! collaborators through [`DocumentProvider`], [`Renderer`], and
//! [`Uploader`]. Single-process deployments back `JobStore` with the
//! in-memory implementation in `motif-store`; a multi-worker deployment
//! swaps in a transactional store behind the same trait.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Batch, ContentElement, DocumentNode, ExportConfig, ExportFormat, Job, JobStatus,
};

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable registry of jobs and their batches; the single source of truth
/// for state transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a newly created job.
    async fn insert_job(&self, job: Job) -> Result<()>;

    /// Get a job by id.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Replace a job's record. Fails with `JobNotFound` if absent.
    async fn put_job(&self, job: Job) -> Result<()>;

    /// Atomically transition a job's status if it currently matches
    /// `expected`. Returns whether the swap happened.
    async fn compare_and_swap_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<bool>;

    /// Insert the batches created by partitioning a job.
    async fn insert_batches(&self, batches: Vec<Batch>) -> Result<()>;

    /// Get a batch by id.
    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>>;

    /// Replace a batch's record. Fails with `BatchNotFound` if absent.
    async fn put_batch(&self, batch: Batch) -> Result<()>;

    /// All batches belonging to a job, ordered by index.
    async fn batches_for_job(&self, job_id: Uuid) -> Result<Vec<Batch>>;

    /// Persist a batch that reached a terminal state and bump the owning
    /// job's counter in the same step. Returns the updated job. Counters
    /// are monotonic: a batch is only counted the first time it goes
    /// terminal.
    async fn record_batch_terminal(&self, batch: Batch) -> Result<Job>;

    /// Re-open a `Failed` batch for an operator-requested retry: status
    /// back to `Pending`, retry budget reset, owning job's failed counter
    /// decremented. The one deliberate exception to counter monotonicity.
    async fn reopen_batch(&self, batch_id: Uuid) -> Result<Batch>;

    /// List jobs, newest first, optionally filtered by status.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>>;

    /// Remove a job and cascade-delete its batches. Returns whether the
    /// job existed.
    async fn remove_job(&self, job_id: Uuid) -> Result<bool>;

    /// Ids of terminal jobs whose completion predates `cutoff`.
    async fn terminal_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

// =============================================================================
// COLLABORATOR BOUNDARIES
// =============================================================================

/// Source of the target document's node tree.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Fetch the document's node tree. Fails with `InvalidDocument` when
    /// the reference cannot be validated.
    async fn get_document(&self, document_ref: &str) -> Result<Vec<DocumentNode>>;
}

/// The external renderer. Rate-limited: every call must go through the
/// orchestrator's worker pool.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Apply a replacement payload to one target.
    async fn transform(
        &self,
        document_ref: &str,
        target_id: &str,
        payload: &ContentElement,
    ) -> Result<()>;

    /// Render one target at the given scale, returning artifact bytes.
    async fn export(
        &self,
        document_ref: &str,
        target_id: &str,
        format: ExportFormat,
        scale: f32,
        config: &ExportConfig,
    ) -> Result<Vec<u8>>;
}

/// Optional post-export delivery to remote storage.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a local artifact, returning its remote URI.
    async fn upload(&self, local_path: &Path, destination: &str) -> Result<String>;
}
