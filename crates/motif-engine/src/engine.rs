//! The orchestration engine: job intake, validation, batch scheduling,
//! retry, checkpointing, and the outbound control surface.
//!
//! One `Engine` owns the queue orchestrator and a handle to every
//! collaborator. Each admitted job gets a driver task that waits for a
//! queue slot, fans its batches out over the renderer worker pool, and
//! finalizes the job when the last batch lands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use motif_core::{
    defaults, Artifact, Batch, BatchStatus, DeliveryManifest, DocumentIndex, DocumentProvider,
    EngineConfig, Error, ExportConfig, Job, JobReport, JobStatus, JobStore, ManifestFeatures,
    Renderer, Result, SelectorMatch, TransformKind, Uploader,
};
use motif_store::Checkpointer;

use crate::executor::BatchExecutor;
use crate::orchestrator::{Admission, QueueOrchestrator};
use crate::partition::partition_targets;
use crate::progress::build_report;
use crate::resolver::{PatternResolver, SelectorRule};
use crate::retry::RetryPolicy;

/// A job submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub document_ref: String,
    pub rules: Vec<SelectorRule>,
    pub kind: TransformKind,
    pub export: ExportConfig,
    /// Targets per batch; defaults to the configured batch size.
    pub batch_size: Option<usize>,
}

/// Event emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    JobSubmitted { job_id: Uuid, queue: String },
    JobStarted { job_id: Uuid },
    JobPaused { job_id: Uuid },
    JobResumed { job_id: Uuid },
    BatchCompleted { job_id: Uuid, batch_index: usize },
    BatchFailed {
        job_id: Uuid,
        batch_index: usize,
        error: String,
    },
    JobCompleted { job_id: Uuid, artifact_count: usize },
    JobFailed { job_id: Uuid, failed_batches: usize },
    JobCancelled { job_id: Uuid },
}

/// The orchestration engine. Cheap to clone; all state lives behind the
/// shared inner.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn DocumentProvider>,
    executor: BatchExecutor,
    orchestrator: QueueOrchestrator,
    checkpointer: Checkpointer,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn DocumentProvider>,
        renderer: Arc<dyn Renderer>,
        uploader: Option<Arc<dyn Uploader>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let retry = RetryPolicy::new(config.max_retries, config.retry_delays.clone());
        let executor = BatchExecutor::new(
            renderer,
            uploader,
            config.export_dir.clone(),
            retry.clone(),
        );
        let orchestrator = QueueOrchestrator::new(&config);
        let checkpointer = Checkpointer::new(config.checkpoint_dir.clone());
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                provider,
                executor,
                orchestrator,
                checkpointer,
                retry,
                event_tx,
            }),
        }
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    // ─── Submission ────────────────────────────────────────────────────

    /// Validate and admit a new job. Validation runs synchronously so the
    /// caller learns about a bad document or empty selector set right
    /// away; batch execution is driven by a background task afterwards.
    #[instrument(skip(self, request), fields(document_ref = %request.document_ref))]
    pub async fn submit_job(&self, request: SubmitRequest) -> Result<Uuid> {
        if request.rules.is_empty() {
            return Err(Error::InvalidInput(
                "submission contains no selector rules".to_string(),
            ));
        }
        if matches!(
            request.kind,
            TransformKind::Export | TransformKind::ReplaceThenExport
        ) {
            request.export.validate()?;
        }

        let batch_size = request
            .batch_size
            .unwrap_or(self.inner.config.batch_size)
            .clamp(1, defaults::BATCH_SIZE_MAX);
        let job = Job::new(
            request.document_ref.clone(),
            request.kind,
            request.export.clone(),
            batch_size,
        );
        let job_id = job.id;
        let queue = job.queue.clone();

        // The record is persisted before admission so a rejected
        // submission still resolves in status queries; it stays Pending
        // until the caller resubmits on its own cadence.
        self.inner.store.insert_job(job).await?;
        match self.inner.orchestrator.submit(&queue).await? {
            Admission::Admitted => {}
            Admission::Rejected { reason } => {
                warn!(job_id = %job_id, %reason, "submission not admitted");
                return Err(Error::AdmissionRejected(reason));
            }
        }

        self.emit(EngineEvent::JobSubmitted {
            job_id,
            queue: queue.clone(),
        });
        self.inner
            .store
            .compare_and_swap_status(job_id, JobStatus::Pending, JobStatus::Validating)
            .await?;

        // Resolve targets up front; a job that can never produce work
        // fails here instead of occupying a queue slot.
        let nodes = match self.inner.provider.get_document(&request.document_ref).await {
            Ok(nodes) => nodes,
            Err(e) => return self.fail_validation(job_id, &queue, e).await,
        };
        let resolver = PatternResolver::new(DocumentIndex::from_tree(&nodes));
        let resolved = match resolver.resolve_rules(&request.rules) {
            Ok(resolved) => resolved,
            Err(e) => return self.fail_validation(job_id, &queue, e).await,
        };
        if resolved.order.is_empty() {
            return self
                .fail_validation(job_id, &queue, Error::NoMatchingTargets)
                .await;
        }

        let batches = partition_targets(
            job_id,
            &resolved.order,
            &resolved.payloads,
            batch_size,
            self.inner.config.max_retries,
        );
        let mut job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        job.total_batches = batches.len();
        self.inner.store.put_job(job).await?;
        self.inner.store.insert_batches(batches).await?;

        info!(
            job_id = %job_id,
            queue,
            target_count = resolved.order.len(),
            batch_size,
            "job admitted"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move { run_job(inner, job_id).await });
        Ok(job_id)
    }

    /// Mark a job failed during validation and release its admission.
    async fn fail_validation(&self, job_id: Uuid, queue: &str, e: Error) -> Result<Uuid> {
        if let Some(mut job) = self.inner.store.get_job(job_id).await? {
            job.status = JobStatus::Failed;
            job.error_summary = Some(e.to_string());
            job.completed_at = Some(Utc::now());
            self.inner.store.put_job(job).await?;
        }
        self.inner.orchestrator.withdraw(queue).await;
        warn!(job_id = %job_id, error = %e, "job failed validation");
        self.emit(EngineEvent::JobFailed {
            job_id,
            failed_batches: 0,
        });
        Err(e)
    }

    // ─── Status & reporting ────────────────────────────────────────────

    /// Current status report for a job, including artifacts produced so
    /// far.
    pub async fn job_status(&self, job_id: Uuid) -> Result<JobReport> {
        let job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        let artifacts = self.collect_artifacts(job_id).await?;
        Ok(build_report(&job, artifacts))
    }

    /// Delivery manifest for a job: every artifact produced, plus which
    /// features the job exercised.
    pub async fn job_manifest(&self, job_id: Uuid) -> Result<DeliveryManifest> {
        let job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        let artifacts = self.collect_artifacts(job_id).await?;
        Ok(build_manifest(&job, &self.inner.config, artifacts))
    }

    async fn collect_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        let batches = self.inner.store.batches_for_job(job_id).await?;
        Ok(batches
            .into_iter()
            .flat_map(|b| b.artifacts)
            .collect())
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        self.inner.store.list_jobs(status, limit, offset).await
    }

    pub async fn queue_status(&self) -> motif_core::QueueStatus {
        self.inner.orchestrator.queue_status().await
    }

    pub async fn system_health(&self) -> motif_core::HealthReport {
        self.inner.orchestrator.system_health().await
    }

    // ─── Control operations ────────────────────────────────────────────

    /// Re-run failed batches of a failed job: the ones named in
    /// `batch_ids`, or every failed batch when `None`. Completed batches
    /// keep their results. Returns the number of batches reopened.
    #[instrument(skip(self, batch_ids))]
    pub async fn retry_job(&self, job_id: Uuid, batch_ids: Option<Vec<Uuid>>) -> Result<usize> {
        let job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        match job.status {
            JobStatus::Failed => {}
            JobStatus::Completed | JobStatus::Cancelled => {
                return Err(Error::AlreadyTerminal(job_id));
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "job {job_id} is still {:?}, nothing to retry",
                    job.status
                )));
            }
        }

        let batches = self.inner.store.batches_for_job(job_id).await?;
        let failed: Vec<Batch> = match &batch_ids {
            Some(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for id in ids {
                    let batch = batches
                        .iter()
                        .find(|b| b.id == *id)
                        .ok_or(Error::BatchNotFound(*id))?;
                    if batch.status != BatchStatus::Failed {
                        return Err(Error::NothingToRetry(job_id));
                    }
                    selected.push(batch.clone());
                }
                selected
            }
            None => batches
                .into_iter()
                .filter(|b| b.status == BatchStatus::Failed)
                .collect(),
        };
        if failed.is_empty() {
            return Err(Error::NothingToRetry(job_id));
        }

        // A retry is a new wave of work and goes through admission again.
        match self.inner.orchestrator.submit(&job.queue).await? {
            Admission::Admitted => {}
            Admission::Rejected { reason } => {
                return Err(Error::AdmissionRejected(reason));
            }
        }

        let reopened = failed.len();
        for batch in &failed {
            self.inner.store.reopen_batch(batch.id).await?;
        }
        let mut job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        job.status = JobStatus::Processing;
        job.error_summary = None;
        job.completed_at = None;
        self.inner.store.put_job(job).await?;

        // Refresh the checkpoint so the reopened batches are no longer
        // listed as terminal and get re-executed by the driver.
        self.inner
            .checkpointer
            .snapshot(self.inner.store.as_ref(), job_id)
            .await?;

        info!(job_id = %job_id, reopened, "retrying failed batches");
        let inner = self.inner.clone();
        tokio::spawn(async move { run_job(inner, job_id).await });
        Ok(reopened)
    }

    /// Cancel a job. In-flight batch attempts finish their current
    /// renderer call but their results are discarded; remaining batches
    /// are marked cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let mut job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(Error::AlreadyTerminal(job_id));
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.inner.store.put_job(job).await?;

        for mut batch in self.inner.store.batches_for_job(job_id).await? {
            if !batch.status.is_terminal() {
                batch.status = BatchStatus::Cancelled;
                batch.completed_at = Some(Utc::now());
                self.inner.store.put_batch(batch).await?;
            }
        }
        if let Err(e) = self
            .inner
            .checkpointer
            .snapshot(self.inner.store.as_ref(), job_id)
            .await
        {
            warn!(job_id = %job_id, error = %e, "failed to snapshot cancelled job");
        }

        info!(job_id = %job_id, "job cancelled");
        self.emit(EngineEvent::JobCancelled { job_id });
        Ok(())
    }

    /// Pause a processing job. Running attempts complete; no new batch
    /// attempt starts until the job is resumed.
    pub async fn pause_job(&self, job_id: Uuid) -> Result<()> {
        let swapped = self
            .inner
            .store
            .compare_and_swap_status(job_id, JobStatus::Processing, JobStatus::Paused)
            .await?;
        if !swapped {
            return Err(Error::InvalidInput(format!(
                "job {job_id} is not processing, cannot pause"
            )));
        }
        info!(job_id = %job_id, "job paused");
        self.emit(EngineEvent::JobPaused { job_id });
        Ok(())
    }

    pub async fn resume_job(&self, job_id: Uuid) -> Result<()> {
        let swapped = self
            .inner
            .store
            .compare_and_swap_status(job_id, JobStatus::Paused, JobStatus::Processing)
            .await?;
        if !swapped {
            return Err(Error::InvalidInput(format!(
                "job {job_id} is not paused, cannot resume"
            )));
        }
        info!(job_id = %job_id, "job resumed");
        self.emit(EngineEvent::JobResumed { job_id });
        Ok(())
    }

    pub async fn pause_queue(&self, queue: &str) -> Result<()> {
        self.inner.orchestrator.pause(queue).await
    }

    pub async fn resume_queue(&self, queue: &str) -> Result<()> {
        self.inner.orchestrator.resume(queue).await
    }

    // ─── Validation & maintenance ──────────────────────────────────────

    /// Dry-run selector resolution against a document. Creates no job.
    pub async fn validate_selectors(
        &self,
        document_ref: &str,
        selectors: &[String],
    ) -> Result<Vec<SelectorMatch>> {
        let nodes = self.inner.provider.get_document(document_ref).await?;
        let resolver = PatternResolver::new(DocumentIndex::from_tree(&nodes));
        let mut matches = Vec::with_capacity(selectors.len());
        for selector in selectors {
            let targets = resolver.resolve(selector)?;
            matches.push(SelectorMatch {
                selector: selector.clone(),
                count: targets.len(),
                matched_targets: targets,
            });
        }
        Ok(matches)
    }

    /// Sweep terminal jobs older than the retention window, removing
    /// their records and checkpoints. Returns the number swept.
    pub async fn cleanup_jobs(&self) -> Result<usize> {
        motif_store::retention::sweep(
            self.inner.store.as_ref(),
            &self.inner.checkpointer,
            self.inner.config.retention_days,
        )
        .await
    }

    /// Snapshot every non-terminal job so a restart can resume from the
    /// last checkpoint.
    pub async fn shutdown(&self) -> Result<()> {
        let jobs = self.inner.store.list_jobs(None, usize::MAX, 0).await?;
        for job in jobs.iter().filter(|j| !j.status.is_terminal()) {
            if let Err(e) = self
                .inner
                .checkpointer
                .snapshot(self.inner.store.as_ref(), job.id)
                .await
            {
                warn!(job_id = %job.id, error = %e, "shutdown snapshot failed");
            }
        }
        info!("engine shut down");
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

// =============================================================================
// JOB DRIVER
// =============================================================================

/// Drive one job to a terminal state: wait for a queue slot, run every
/// non-terminal batch over the worker pool, checkpoint along the way,
/// finalize.
#[instrument(skip(inner))]
async fn run_job(inner: Arc<EngineInner>, job_id: Uuid) {
    let job = match inner.store.get_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            error!(job_id = %job_id, "driver started for unknown job");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "driver failed to load job");
            return;
        }
    };
    let queue = job.queue.clone();

    if let Err(e) = inner.orchestrator.start(&queue).await {
        error!(job_id = %job_id, error = %e, "failed to take queue slot");
        return;
    }

    // The job may have been cancelled while queued.
    match inner.store.get_job(job_id).await {
        Ok(Some(j)) if j.status == JobStatus::Cancelled => {
            inner.orchestrator.complete(&queue, false).await;
            return;
        }
        Ok(Some(_)) => {}
        _ => {
            inner.orchestrator.complete(&queue, false).await;
            return;
        }
    }

    // Fresh jobs move Validating -> Processing here; retried jobs are
    // already Processing and the swap is a no-op.
    let _ = inner
        .store
        .compare_and_swap_status(job_id, JobStatus::Validating, JobStatus::Processing)
        .await;
    let _ = inner.event_tx.send(EngineEvent::JobStarted { job_id });
    info!(job_id = %job_id, queue, "job processing started");

    // A checkpoint from a previous run marks batches that must not be
    // re-executed even if their stored status was lost.
    let snapshot = match inner.checkpointer.load(job_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "checkpoint load failed, starting clean");
            None
        }
    };

    let batches = match inner.store.batches_for_job(job_id).await {
        Ok(batches) => batches,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to load batches");
            inner.orchestrator.complete(&queue, false).await;
            return;
        }
    };

    let terminal_seen = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();
    for batch in batches {
        if batch.status.is_terminal() {
            continue;
        }
        if let Some(snap) = &snapshot {
            if snap.contains(batch.id) {
                debug!(batch_id = %batch.id, "skipping checkpointed batch");
                continue;
            }
        }
        let inner = inner.clone();
        let job = job.clone();
        let counter = terminal_seen.clone();
        tasks.spawn(async move { run_batch(inner, job, batch, counter).await });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(job_id = %job_id, error = ?e, "batch task panicked");
        }
    }

    finalize_job(&inner, job_id, &queue).await;
}

/// Execute one batch with retry. Discards its result if the job was
/// cancelled underneath it.
async fn run_batch(
    inner: Arc<EngineInner>,
    job: Job,
    mut batch: Batch,
    terminal_seen: Arc<AtomicUsize>,
) {
    let job_id = job.id;
    loop {
        // Pause/cancel gate before every attempt.
        match inner.store.get_job(job_id).await {
            Ok(Some(j)) if j.status == JobStatus::Cancelled => return,
            Ok(Some(j)) if j.status == JobStatus::Paused => {
                sleep(inner.config.poll_interval).await;
                continue;
            }
            Ok(Some(_)) => {}
            _ => return,
        }

        let permit = match inner.orchestrator.acquire_worker().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "worker pool unavailable");
                return;
            }
        };

        // The job may have been cancelled or paused while this task was
        // waiting for a worker.
        match inner.store.get_job(job_id).await {
            Ok(Some(j)) if j.status == JobStatus::Cancelled => return,
            Ok(Some(j)) if j.status == JobStatus::Paused => {
                drop(permit);
                sleep(inner.config.poll_interval).await;
                continue;
            }
            Ok(Some(_)) => {}
            _ => return,
        }

        batch.status = BatchStatus::Processing;
        batch.started_at.get_or_insert_with(Utc::now);
        if let Err(e) = inner.store.put_batch(batch.clone()).await {
            error!(batch_id = %batch.id, error = %e, "failed to persist batch state");
            return;
        }

        let outcome = inner
            .executor
            .execute(&batch, &job.document_ref, job.kind, &job.export)
            .await;
        drop(permit);

        // Cancellation during the attempt discards the result.
        if let Ok(Some(j)) = inner.store.get_job(job_id).await {
            if j.status == JobStatus::Cancelled {
                batch.status = BatchStatus::Cancelled;
                batch.completed_at = Some(Utc::now());
                let _ = inner.store.put_batch(batch).await;
                return;
            }
        }

        match outcome.error {
            None => {
                batch.status = BatchStatus::Completed;
                batch.artifacts = outcome.artifacts;
                batch.error = None;
                batch.completed_at = Some(Utc::now());
                record_terminal(&inner, &batch, &terminal_seen).await;
                let _ = inner.event_tx.send(EngineEvent::BatchCompleted {
                    job_id,
                    batch_index: batch.index,
                });
                return;
            }
            Some(e) => {
                if e.is_recoverable() && inner.retry.should_retry(batch.retry_count) {
                    batch.retry_count += 1;
                    batch.error = Some(e.to_string());
                    if let Err(pe) = inner.store.put_batch(batch.clone()).await {
                        error!(batch_id = %batch.id, error = %pe, "failed to persist retry state");
                        return;
                    }
                    let delay = inner.retry.delay_for(batch.retry_count);
                    warn!(
                        job_id = %job_id,
                        batch_index = batch.index,
                        attempt = batch.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "batch attempt failed, backing off"
                    );
                    sleep(delay).await;
                } else {
                    batch.status = BatchStatus::Failed;
                    batch.error = Some(e.to_string());
                    batch.completed_at = Some(Utc::now());
                    record_terminal(&inner, &batch, &terminal_seen).await;
                    warn!(
                        job_id = %job_id,
                        batch_index = batch.index,
                        error = %e,
                        "batch failed permanently"
                    );
                    let _ = inner.event_tx.send(EngineEvent::BatchFailed {
                        job_id,
                        batch_index: batch.index,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }
}

/// Persist a terminal batch and checkpoint at the configured interval.
async fn record_terminal(inner: &Arc<EngineInner>, batch: &Batch, terminal_seen: &AtomicUsize) {
    let job_id = batch.job_id;
    if let Err(e) = inner.store.record_batch_terminal(batch.clone()).await {
        error!(batch_id = %batch.id, error = %e, "failed to record terminal batch");
        return;
    }
    let seen = terminal_seen.fetch_add(1, Ordering::SeqCst) + 1;
    if seen % inner.config.checkpoint_interval == 0 {
        if let Err(e) = inner.checkpointer.snapshot(inner.store.as_ref(), job_id).await {
            warn!(job_id = %job_id, error = %e, "interval checkpoint failed");
        }
    }
}

/// Settle the job's terminal status, write the delivery manifest, and
/// release the queue slot.
async fn finalize_job(inner: &Arc<EngineInner>, job_id: Uuid, queue: &str) {
    let job = match inner.store.get_job(job_id).await {
        Ok(Some(job)) => job,
        _ => {
            inner.orchestrator.complete(queue, false).await;
            return;
        }
    };

    if job.status == JobStatus::Cancelled {
        inner.orchestrator.complete(queue, false).await;
        return;
    }

    let succeeded = job.failed_batches == 0;
    let terminal = if succeeded {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    // A pause that lands after the last batch goes terminal must not
    // strand the job, so the swap also settles from Paused.
    let settled = inner
        .store
        .compare_and_swap_status(job_id, JobStatus::Processing, terminal)
        .await
        .unwrap_or(false);
    if !settled {
        let _ = inner
            .store
            .compare_and_swap_status(job_id, JobStatus::Paused, terminal)
            .await;
    }
    if !succeeded {
        if let Ok(Some(mut job)) = inner.store.get_job(job_id).await {
            job.error_summary = Some(format!(
                "{} of {} batches failed",
                job.failed_batches, job.total_batches
            ));
            let _ = inner.store.put_job(job).await;
        }
    }

    if let Err(e) = inner.checkpointer.snapshot(inner.store.as_ref(), job_id).await {
        warn!(job_id = %job_id, error = %e, "final checkpoint failed");
    }

    // Manifest reflects whatever was produced, including partial output
    // of a job that completed with failures.
    match write_manifest(inner, job_id).await {
        Ok(manifest) => {
            if succeeded {
                info!(
                    job_id = %job_id,
                    artifact_count = manifest.artifact_count,
                    "job completed"
                );
                let _ = inner.event_tx.send(EngineEvent::JobCompleted {
                    job_id,
                    artifact_count: manifest.artifact_count,
                });
            }
        }
        Err(e) => warn!(job_id = %job_id, error = %e, "manifest write failed"),
    }

    if !succeeded {
        if let Ok(Some(job)) = inner.store.get_job(job_id).await {
            warn!(
                job_id = %job_id,
                failed_batches = job.failed_batches,
                "job completed with failures"
            );
            let _ = inner.event_tx.send(EngineEvent::JobFailed {
                job_id,
                failed_batches: job.failed_batches,
            });
        }
    }

    inner.orchestrator.complete(queue, succeeded).await;
}

/// Assemble and persist the delivery manifest next to the job's artifacts.
async fn write_manifest(inner: &Arc<EngineInner>, job_id: Uuid) -> Result<DeliveryManifest> {
    let job = inner
        .store
        .get_job(job_id)
        .await?
        .ok_or(Error::JobNotFound(job_id))?;
    let artifacts: Vec<Artifact> = inner
        .store
        .batches_for_job(job_id)
        .await?
        .into_iter()
        .flat_map(|b| b.artifacts)
        .collect();
    let manifest = build_manifest(&job, &inner.config, artifacts);

    let dir = inner.config.export_dir.join(job_id.to_string());
    tokio::fs::create_dir_all(&dir).await?;
    let body = serde_json::to_vec_pretty(&manifest)?;
    tokio::fs::write(dir.join("manifest.json"), body).await?;
    Ok(manifest)
}

fn build_manifest(job: &Job, config: &EngineConfig, artifacts: Vec<Artifact>) -> DeliveryManifest {
    let features = ManifestFeatures {
        replace: matches!(
            job.kind,
            TransformKind::Replace | TransformKind::ReplaceThenExport
        ),
        export: matches!(
            job.kind,
            TransformKind::Export | TransformKind::ReplaceThenExport
        ),
        remote_delivery: job.export.remote_destination.is_some(),
    };
    DeliveryManifest {
        job_id: job.id,
        document_ref: job.document_ref.clone(),
        total_batches: job.total_batches,
        completed_batches: job.completed_batches,
        failed_batches: job.failed_batches,
        artifact_count: artifacts.len(),
        output_dir: config.export_dir.join(job.id.to_string()),
        artifacts,
        features,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motif_core::{ContentElement, DocumentNode, ExportFormat};
    use motif_store::MemoryJobStore;
    use std::path::Path;
    use tempfile::TempDir;

    struct StaticProvider {
        nodes: Vec<DocumentNode>,
    }

    #[async_trait::async_trait]
    impl DocumentProvider for StaticProvider {
        async fn get_document(&self, document_ref: &str) -> Result<Vec<DocumentNode>> {
            if document_ref == "missing" {
                return Err(Error::InvalidDocument("missing".to_string()));
            }
            Ok(self.nodes.clone())
        }
    }

    struct OkRenderer;

    #[async_trait::async_trait]
    impl Renderer for OkRenderer {
        async fn transform(
            &self,
            _document_ref: &str,
            _target_id: &str,
            _payload: &ContentElement,
        ) -> Result<()> {
            Ok(())
        }

        async fn export(
            &self,
            _document_ref: &str,
            _target_id: &str,
            _format: ExportFormat,
            _scale: f32,
            _config: &ExportConfig,
        ) -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    fn leaf(id: &str, name: &str) -> DocumentNode {
        DocumentNode {
            id: id.to_string(),
            name: name.to_string(),
            children: vec![],
        }
    }

    fn engine_with_nodes(dir: &Path, nodes: Vec<DocumentNode>) -> Engine {
        let config = EngineConfig {
            export_dir: dir.join("exports"),
            checkpoint_dir: dir.join("checkpoints"),
            retry_delays: vec![std::time::Duration::from_millis(5)],
            poll_interval: std::time::Duration::from_millis(5),
            ..EngineConfig::default()
        };
        Engine::new(
            config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(StaticProvider { nodes }),
            Arc::new(OkRenderer),
            None,
        )
    }

    fn replace_request(selector: &str) -> SubmitRequest {
        SubmitRequest {
            document_ref: "doc-1".to_string(),
            rules: vec![SelectorRule {
                selector: selector.to_string(),
                payload: ContentElement::Text {
                    content: "new".to_string(),
                },
            }],
            kind: TransformKind::Replace,
            export: ExportConfig::new(ExportFormat::Png, "./unused"),
            batch_size: None,
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_rule_set() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(dir.path(), vec![leaf("1:1", "Banner")]);
        let mut request = replace_request("Banner");
        request.rules.clear();
        assert!(matches!(
            engine.submit_job(request).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_fails_on_bad_document() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(dir.path(), vec![leaf("1:1", "Banner")]);
        let mut request = replace_request("Banner");
        request.document_ref = "missing".to_string();
        assert!(matches!(
            engine.submit_job(request).await,
            Err(Error::InvalidDocument(_))
        ));
        // The failed job is still queryable.
        let jobs = engine.list_jobs(Some(JobStatus::Failed), 10, 0).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_fails_when_nothing_matches() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(dir.path(), vec![leaf("1:1", "Banner")]);
        assert!(matches!(
            engine.submit_job(replace_request("zzz*")).await,
            Err(Error::NoMatchingTargets)
        ));
    }

    #[tokio::test]
    async fn test_validate_selectors_dry_run_creates_no_job() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(
            dir.path(),
            vec![leaf("1:1", "Banner"), leaf("1:2", "Banner Small")],
        );
        let matches = engine
            .validate_selectors("doc-1", &["banner*".to_string(), "1:9".to_string()])
            .await
            .unwrap();
        assert_eq!(matches[0].count, 2);
        assert_eq!(matches[1].count, 0);
        assert!(engine.list_jobs(None, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_operations_fail_cleanly() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(dir.path(), vec![]);
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.job_status(id).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(matches!(
            engine.cancel_job(id).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(matches!(
            engine.retry_job(id, None).await,
            Err(Error::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_a_pending_record() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig {
            export_dir: dir.path().join("exports"),
            checkpoint_dir: dir.path().join("checkpoints"),
            ..EngineConfig::default()
        };
        // Zero threshold rejects every submission.
        config.admission_load_threshold = 0.0;
        let engine = Engine::new(
            config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(StaticProvider {
                nodes: vec![leaf("1:1", "Banner")],
            }),
            Arc::new(OkRenderer),
            None,
        );

        assert!(matches!(
            engine.submit_job(replace_request("Banner")).await,
            Err(Error::AdmissionRejected(_))
        ));
        // The job stays queryable in Pending for caller-paced resubmission.
        let jobs = engine
            .list_jobs(Some(JobStatus::Pending), 10, 0)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_settles_job_paused_after_last_batch() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_nodes(dir.path(), vec![]);

        // A pause that raced the last terminal batch: all batches are
        // done but the stored status is Paused, not Processing.
        let mut job = Job::new(
            "doc-1",
            TransformKind::Replace,
            ExportConfig::new(ExportFormat::Png, "./unused"),
            6,
        );
        job.status = JobStatus::Paused;
        job.total_batches = 1;
        job.completed_batches = 1;
        let job_id = job.id;
        let queue = job.queue.clone();
        engine.inner.store.insert_job(job).await.unwrap();

        finalize_job(&engine.inner, job_id, &queue).await;

        let report = engine.job_status(job_id).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        // A settled job can no longer be resumed into a dead Processing state.
        assert!(engine.resume_job(job_id).await.is_err());
    }
}
