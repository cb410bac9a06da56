//! Integration tests for the orchestration engine.
//!
//! This test suite validates:
//! - Engine-001: Submission resolves selectors, partitions, and completes
//! - Engine-002: Transient renderer failures are retried with backoff
//! - Engine-003: Permanent failures leave a partial job with a manifest
//! - Engine-004: Operator retry re-runs only the failed batches
//! - Engine-005: Batch concurrency stays within the worker pool size
//! - Engine-006: Cancellation stops remaining batches
//! - Engine-007: Events are broadcast across the job lifecycle
//! - Engine-008: Checkpoints survive across engine instances
//! - Engine-009: Selective retry re-runs only the named batches
//!
//! ISOLATION: every test gets its own tempdir, store, and engine, so the
//! tests run in parallel without competing for queue capacity.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use motif_core::{
    ContentElement, DocumentNode, DocumentProvider, EngineConfig, Error, ExportConfig,
    ExportFormat, JobReport, JobStatus, JobStore, Renderer, Result, TransformKind,
};
use motif_engine::{Engine, EngineEvent, SelectorRule, SubmitRequest};
use motif_store::{Checkpointer, MemoryJobStore};

// ============================================================================
// HELPERS
// ============================================================================

/// Fixed document tree: `n` leaf nodes named "Slot 1".."Slot n".
struct SlotProvider {
    count: usize,
}

#[async_trait]
impl DocumentProvider for SlotProvider {
    async fn get_document(&self, _document_ref: &str) -> Result<Vec<DocumentNode>> {
        Ok((1..=self.count)
            .map(|i| DocumentNode {
                id: format!("1:{i}"),
                name: format!("Slot {i}"),
                children: vec![],
            })
            .collect())
    }
}

/// Scriptable renderer: per-target transient failure budgets, an optional
/// always-fail switch, a configurable per-call delay, and concurrency
/// tracking.
struct ScriptedRenderer {
    /// Remaining transient failures per target id.
    transient: Mutex<HashMap<String, usize>>,
    /// Targets that fail while `failing` is set.
    fail_targets: Vec<String>,
    failing: AtomicBool,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRenderer {
    fn ok() -> Self {
        Self {
            transient: Mutex::new(HashMap::new()),
            fail_targets: vec![],
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_transient(failures: &[(&str, usize)]) -> Self {
        let mut renderer = Self::ok();
        renderer.transient = Mutex::new(
            failures
                .iter()
                .map(|(id, n)| (id.to_string(), *n))
                .collect(),
        );
        renderer
    }

    fn with_fail_targets(targets: &[&str]) -> Self {
        let mut renderer = Self::ok();
        renderer.fail_targets = targets.iter().map(|t| t.to_string()).collect();
        renderer.failing = AtomicBool::new(true);
        renderer
    }

    fn with_delay(delay: Duration) -> Self {
        let mut renderer = Self::ok();
        renderer.delay = delay;
        renderer
    }

    async fn calls_for(&self, target_id: &str) -> usize {
        *self.calls.lock().await.get(target_id).unwrap_or(&0)
    }

    fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn track(&self, target_id: &str) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        *self
            .calls
            .lock()
            .await
            .entry(target_id.to_string())
            .or_insert(0) += 1;

        if self.failing.load(Ordering::SeqCst)
            && self.fail_targets.iter().any(|t| t == target_id)
        {
            return Err(Error::Transform(format!("scripted failure on {target_id}")));
        }
        let mut transient = self.transient.lock().await;
        if let Some(remaining) = transient.get_mut(target_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Transform(format!(
                    "transient failure on {target_id}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn transform(
        &self,
        _document_ref: &str,
        target_id: &str,
        _payload: &ContentElement,
    ) -> Result<()> {
        self.track(target_id).await
    }

    async fn export(
        &self,
        _document_ref: &str,
        target_id: &str,
        _format: ExportFormat,
        _scale: f32,
        _config: &ExportConfig,
    ) -> Result<Vec<u8>> {
        self.track(target_id).await?;
        Ok(vec![0u8; 8])
    }
}

fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        export_dir: dir.join("exports"),
        checkpoint_dir: dir.join("checkpoints"),
        retry_delays: vec![Duration::from_millis(5), Duration::from_millis(10)],
        poll_interval: Duration::from_millis(5),
        checkpoint_interval: 1,
        ..EngineConfig::default()
    }
}

fn build_engine(
    config: EngineConfig,
    store: Arc<MemoryJobStore>,
    provider_count: usize,
    renderer: Arc<ScriptedRenderer>,
) -> Engine {
    // Honors RUST_LOG when debugging a flaky run; a no-op otherwise.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Engine::new(
        config,
        store,
        Arc::new(SlotProvider {
            count: provider_count,
        }),
        renderer,
        None,
    )
}

fn replace_all_request(kind: TransformKind, export_dir: &Path) -> SubmitRequest {
    SubmitRequest {
        document_ref: "doc-1".to_string(),
        rules: vec![SelectorRule {
            selector: "slot *".to_string(),
            payload: ContentElement::Text {
                content: "updated".to_string(),
            },
        }],
        kind,
        export: ExportConfig::new(ExportFormat::Png, export_dir),
        batch_size: None,
    }
}

async fn wait_terminal(engine: &Engine, job_id: Uuid) -> JobReport {
    for _ in 0..600 {
        let report = engine.job_status(job_id).await.expect("job must exist");
        if report.status.is_terminal() {
            return report;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_replace_job_completes_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::ok());
    let engine = build_engine(test_config(dir.path()), store, 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_batches, 2); // 12 targets / batch size 6
    assert_eq!(report.completed_batches, 2);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(report.progress, 100.0);
    for i in 1..=12 {
        assert_eq!(renderer.calls_for(&format!("1:{i}")).await, 1);
    }
}

#[tokio::test]
async fn test_export_job_produces_artifacts_and_manifest() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::ok());
    let config = test_config(dir.path());
    let export_root = config.export_dir.clone();
    let engine = build_engine(config, store, 3, renderer);

    let mut request = replace_all_request(TransformKind::Export, dir.path());
    request.export = ExportConfig::new(ExportFormat::Png, dir.path()).with_scales(vec![1.0, 2.0]);
    let job_id = engine.submit_job(request).await.unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    // 3 targets x 2 scales
    assert_eq!(report.artifacts.len(), 6);
    assert!(report
        .artifacts
        .iter()
        .any(|a| a.filename == "1:1_2x.png"));

    let manifest = engine.job_manifest(job_id).await.unwrap();
    assert_eq!(manifest.artifact_count, 6);
    assert!(manifest.features.export);
    assert!(!manifest.features.replace);
    assert!(!manifest.features.remote_delivery);
    assert!(export_root
        .join(job_id.to_string())
        .join("manifest.json")
        .exists());
}

// ============================================================================
// RETRY
// ============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried_to_success() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    // Two transient failures on a first-batch target, one on a
    // second-batch target; both within the default budget of 3 retries.
    let renderer = Arc::new(ScriptedRenderer::with_transient(&[("1:3", 2), ("1:8", 1)]));
    let engine = build_engine(test_config(dir.path()), store, 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.completed_batches, 2);
    assert_eq!(renderer.calls_for("1:3").await, 3);
    assert_eq!(renderer.calls_for("1:8").await, 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_batch_but_not_the_rest() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_fail_targets(&["1:12"]));
    let engine = build_engine(test_config(dir.path()), store, 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.completed_batches, 1);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.progress, 50.0);
    assert!(report.message.contains("completed with failures"));
    assert!(report.error_summary.is_some());
    // Initial attempt plus three retries.
    assert_eq!(renderer.calls_for("1:12").await, 4);
}

#[tokio::test]
async fn test_operator_retry_reruns_only_failed_batches() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_fail_targets(&["1:12"]));
    let engine = build_engine(test_config(dir.path()), store, 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    let first_batch_calls = renderer.calls_for("1:1").await;

    // Clear the fault and retry the job.
    renderer.failing.store(false, Ordering::SeqCst);
    let reopened = engine.retry_job(job_id, None).await.unwrap();
    assert_eq!(reopened, 1);
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.completed_batches, 2);
    assert_eq!(report.failed_batches, 0);
    // The completed batch was not re-executed.
    assert_eq!(renderer.calls_for("1:1").await, first_batch_calls);
}

#[tokio::test]
async fn test_selective_retry_reruns_only_named_batches() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    // One failing target in each of the two batches.
    let renderer = Arc::new(ScriptedRenderer::with_fail_targets(&["1:6", "1:12"]));
    let engine = build_engine(test_config(dir.path()), store.clone(), 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.failed_batches, 2);

    // Clear the fault and retry just the second batch.
    renderer.failing.store(false, Ordering::SeqCst);
    let first_batch_calls = renderer.calls_for("1:6").await;
    let second_batch = store
        .batches_for_job(job_id)
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.index == 1)
        .unwrap();
    let reopened = engine
        .retry_job(job_id, Some(vec![second_batch.id]))
        .await
        .unwrap();
    assert_eq!(reopened, 1);
    let report = wait_terminal(&engine, job_id).await;

    // The named batch recovered; the first batch was left untouched and
    // keeps the job failed.
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.completed_batches, 1);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(renderer.calls_for("1:6").await, first_batch_calls);

    // Unknown and non-failed batch ids are rejected outright.
    assert!(matches!(
        engine.retry_job(job_id, Some(vec![Uuid::new_v4()])).await,
        Err(Error::BatchNotFound(_))
    ));
    assert!(matches!(
        engine.retry_job(job_id, Some(vec![second_batch.id])).await,
        Err(Error::NothingToRetry(_))
    ));
}

#[tokio::test]
async fn test_retry_of_completed_job_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::ok());
    let engine = build_engine(test_config(dir.path()), store, 3, renderer);

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    wait_terminal(&engine, job_id).await;

    assert!(matches!(
        engine.retry_job(job_id, None).await,
        Err(Error::AlreadyTerminal(_))
    ));
}

// ============================================================================
// CONCURRENCY & ADMISSION
// ============================================================================

#[tokio::test]
async fn test_batch_concurrency_bounded_by_worker_pool() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_delay(Duration::from_millis(25)));
    let mut config = test_config(dir.path());
    config.max_concurrent_requests = 2;
    config.batch_size = 1; // 8 single-target batches
    let engine = build_engine(config, store, 8, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_batches, 8);
    assert!(renderer.max_concurrency() <= 2);
    assert!(renderer.max_concurrency() >= 1);
}

#[tokio::test]
async fn test_cancel_stops_remaining_batches() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_delay(Duration::from_millis(50)));
    let mut config = test_config(dir.path());
    config.batch_size = 1;
    config.max_concurrent_requests = 1;
    let engine = build_engine(config, store, 10, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    sleep(Duration::from_millis(60)).await;
    engine.cancel_job(job_id).await.unwrap();
    let report = wait_terminal(&engine, job_id).await;

    assert_eq!(report.status, JobStatus::Cancelled);
    // With 50ms per single-target batch and one worker, nowhere near all
    // ten targets can have been touched.
    let mut touched = 0;
    for i in 1..=10 {
        touched += renderer.calls_for(&format!("1:{i}")).await;
    }
    assert!(touched < 10, "cancel did not stop execution ({touched} calls)");

    assert!(matches!(
        engine.cancel_job(job_id).await,
        Err(Error::AlreadyTerminal(_))
    ));
}

#[tokio::test]
async fn test_pause_stops_new_batches_until_resume() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_delay(Duration::from_millis(30)));
    let mut config = test_config(dir.path());
    config.batch_size = 1;
    config.max_concurrent_requests = 1;
    let engine = build_engine(config, store, 6, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    sleep(Duration::from_millis(40)).await;
    engine.pause_job(job_id).await.unwrap();

    // Let the in-flight attempt drain, then confirm nothing new starts.
    sleep(Duration::from_millis(60)).await;
    let mut paused_calls = 0;
    for i in 1..=6 {
        paused_calls += renderer.calls_for(&format!("1:{i}")).await;
    }
    sleep(Duration::from_millis(100)).await;
    let mut still_paused_calls = 0;
    for i in 1..=6 {
        still_paused_calls += renderer.calls_for(&format!("1:{i}")).await;
    }
    assert_eq!(paused_calls, still_paused_calls);
    assert_eq!(
        engine.job_status(job_id).await.unwrap().status,
        JobStatus::Paused
    );

    engine.resume_job(job_id).await.unwrap();
    let report = wait_terminal(&engine, job_id).await;
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.completed_batches, 6);
}

// ============================================================================
// EVENTS
// ============================================================================

#[tokio::test]
async fn test_lifecycle_events_are_broadcast() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::ok());
    let engine = build_engine(test_config(dir.path()), store, 6, renderer);
    let mut events = engine.events();

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    wait_terminal(&engine, job_id).await;
    // The terminal status lands before the final event; give the driver a
    // moment to emit it.
    sleep(Duration::from_millis(50)).await;

    let mut saw_submitted = false;
    let mut saw_started = false;
    let mut saw_batch = false;
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::JobSubmitted { job_id: id, .. } if id == job_id => saw_submitted = true,
            EngineEvent::JobStarted { job_id: id } if id == job_id => saw_started = true,
            EngineEvent::BatchCompleted { job_id: id, .. } if id == job_id => saw_batch = true,
            EngineEvent::JobCompleted { job_id: id, .. } if id == job_id => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_submitted && saw_started && saw_batch && saw_completed);
}

// ============================================================================
// CHECKPOINTING
// ============================================================================

#[tokio::test]
async fn test_checkpoint_survives_engine_restart() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let renderer = Arc::new(ScriptedRenderer::with_fail_targets(&["1:12"]));
    let config = test_config(dir.path());
    let checkpoint_dir = config.checkpoint_dir.clone();
    let engine = build_engine(config, store.clone(), 12, renderer.clone());

    let job_id = engine
        .submit_job(replace_all_request(TransformKind::Replace, dir.path()))
        .await
        .unwrap();
    let report = wait_terminal(&engine, job_id).await;
    assert_eq!(report.status, JobStatus::Failed);

    // The checkpoint on disk records the completed batch.
    let checkpointer = Checkpointer::new(&checkpoint_dir);
    let snapshot = checkpointer.load(job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.completed_count, 1);
    assert_eq!(snapshot.failed_count, 1);

    // A fresh engine over the same store and checkpoint dir retries the
    // job without touching the checkpointed batch.
    renderer.failing.store(false, Ordering::SeqCst);
    let first_batch_calls = renderer.calls_for("1:1").await;
    let engine2 = build_engine(test_config(dir.path()), store, 12, renderer.clone());
    engine2.retry_job(job_id, None).await.unwrap();
    let report = wait_terminal(&engine2, job_id).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(renderer.calls_for("1:1").await, first_batch_calls);
}
