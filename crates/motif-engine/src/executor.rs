//! Batch execution: drive one batch's targets through the renderer and,
//! for export jobs, write artifacts to disk and optionally deliver them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use motif_core::{
    scale_label, Artifact, Batch, Error, ExportConfig, Renderer, Result, TransformKind, Uploader,
};

use crate::retry::RetryPolicy;

/// What one execution attempt produced. A failed attempt carries the error
/// so the caller can decide between retry and terminal failure; a degraded
/// outcome succeeded locally but could not deliver every artifact remotely.
#[derive(Debug)]
pub struct BatchOutcome {
    pub artifacts: Vec<Artifact>,
    pub error: Option<Error>,
    pub degraded_delivery: bool,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes batches against the renderer. Stateless between batches; all
/// rate limiting happens in the orchestrator before `execute` is called.
pub struct BatchExecutor {
    renderer: Arc<dyn Renderer>,
    uploader: Option<Arc<dyn Uploader>>,
    export_dir: PathBuf,
    retry: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        uploader: Option<Arc<dyn Uploader>>,
        export_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            renderer,
            uploader,
            export_dir: export_dir.into(),
            retry,
        }
    }

    /// Run one attempt over every target in the batch. Replacement runs
    /// before export so exported artifacts reflect the new content. The
    /// attempt stops at the first renderer error; already-produced
    /// artifacts are kept in the outcome for the manifest.
    pub async fn execute(
        &self,
        batch: &Batch,
        document_ref: &str,
        kind: TransformKind,
        export: &ExportConfig,
    ) -> BatchOutcome {
        let start = Instant::now();
        let mut artifacts = Vec::new();
        let mut degraded = false;

        if matches!(
            kind,
            TransformKind::Replace | TransformKind::ReplaceThenExport
        ) {
            for target in &batch.targets {
                if let Err(e) = self
                    .renderer
                    .transform(document_ref, &target.target_id, &target.payload)
                    .await
                {
                    return BatchOutcome {
                        artifacts,
                        error: Some(e),
                        degraded_delivery: degraded,
                    };
                }
            }
        }

        if matches!(
            kind,
            TransformKind::Export | TransformKind::ReplaceThenExport
        ) {
            for target in &batch.targets {
                for &scale in &export.scales {
                    match self
                        .export_one(batch.job_id, document_ref, &target.target_id, scale, export)
                        .await
                    {
                        Ok((artifact, delivered)) => {
                            if !delivered {
                                degraded = true;
                            }
                            artifacts.push(artifact);
                        }
                        Err(e) => {
                            return BatchOutcome {
                                artifacts,
                                error: Some(e),
                                degraded_delivery: degraded,
                            };
                        }
                    }
                }
            }
        }

        debug!(
            batch_id = %batch.id,
            batch_index = batch.index,
            target_count = batch.targets.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch attempt succeeded"
        );

        BatchOutcome {
            artifacts,
            error: None,
            degraded_delivery: degraded,
        }
    }

    /// Export one target at one scale: render, write to disk, upload when
    /// a remote destination is configured. Upload failures are retried
    /// under the same backoff policy as batch attempts; exhaustion
    /// degrades the artifact to local-only delivery instead of failing
    /// the batch.
    async fn export_one(
        &self,
        job_id: Uuid,
        document_ref: &str,
        target_id: &str,
        scale: f32,
        export: &ExportConfig,
    ) -> Result<(Artifact, bool)> {
        let bytes = self
            .renderer
            .export(document_ref, target_id, export.format, scale, export)
            .await?;

        let filename = format!(
            "{}_{}.{}",
            target_id,
            scale_label(scale),
            export.format.as_str()
        );
        let dir = self.export_dir.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let local_path = dir.join(&filename);
        tokio::fs::write(&local_path, &bytes).await?;

        let mut delivered = true;
        let remote_uri = match (&export.remote_destination, &self.uploader) {
            (Some(destination), Some(uploader)) => {
                let uri = self
                    .upload_with_retry(uploader.as_ref(), &local_path, destination, target_id)
                    .await;
                if uri.is_none() {
                    delivered = false;
                }
                uri
            }
            _ => None,
        };

        Ok((
            Artifact {
                filename,
                local_path,
                remote_uri,
                format: export.format,
                scale,
                size_bytes: bytes.len() as u64,
                target_id: target_id.to_string(),
            },
            delivered,
        ))
    }

    /// Attempt an upload until the retry budget runs out. Returns the
    /// remote URI on success, `None` once delivery is given up on.
    async fn upload_with_retry(
        &self,
        uploader: &dyn Uploader,
        local_path: &Path,
        destination: &str,
        target_id: &str,
    ) -> Option<String> {
        let mut attempts = 0u32;
        loop {
            match uploader.upload(local_path, destination).await {
                Ok(uri) => {
                    info!(target_id, %uri, "artifact delivered");
                    return Some(uri);
                }
                Err(e) if self.retry.should_retry(attempts) => {
                    attempts += 1;
                    let delay = self.retry.delay_for(attempts);
                    warn!(
                        target_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "upload failed, backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        target_id,
                        error = %e,
                        "upload retries exhausted, keeping local artifact"
                    );
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use motif_core::{BatchTarget, ContentElement, ExportFormat};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, vec![Duration::from_millis(1)])
    }

    struct FakeRenderer {
        transforms: AtomicUsize,
        exports: AtomicUsize,
        fail_transform_on: Option<String>,
        fail_export: bool,
    }

    impl FakeRenderer {
        fn ok() -> Self {
            Self {
                transforms: AtomicUsize::new(0),
                exports: AtomicUsize::new(0),
                fail_transform_on: None,
                fail_export: false,
            }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn transform(
            &self,
            _document_ref: &str,
            target_id: &str,
            _payload: &ContentElement,
        ) -> Result<()> {
            if self.fail_transform_on.as_deref() == Some(target_id) {
                return Err(Error::Transform(format!("boom on {target_id}")));
            }
            self.transforms.fetch_add(1, Ordering::SeqCst);
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
            if self.fail_export {
                return Err(Error::Transform("render failed".to_string()));
            }
            self.exports.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0u8; 16])
        }
    }

    /// Fails the first `failures` uploads, then succeeds.
    struct FlakyUploader {
        calls: AtomicUsize,
        failures: usize,
    }

    impl FlakyUploader {
        fn failing_first(failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl Uploader for FlakyUploader {
        async fn upload(&self, _local_path: &Path, destination: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::Upload("bucket unreachable".to_string()));
            }
            Ok(format!("{destination}/ok"))
        }
    }

    fn sample_batch() -> Batch {
        let targets = vec![
            BatchTarget {
                target_id: "1:1".to_string(),
                payload: ContentElement::Text {
                    content: "hello".to_string(),
                },
            },
            BatchTarget {
                target_id: "1:2".to_string(),
                payload: ContentElement::Text {
                    content: "world".to_string(),
                },
            },
        ];
        Batch::new(Uuid::new_v4(), 0, targets, 3)
    }

    #[tokio::test]
    async fn test_replace_only_touches_every_target() {
        let renderer = Arc::new(FakeRenderer::ok());
        let dir = TempDir::new().unwrap();
        let executor = BatchExecutor::new(renderer.clone(), None, dir.path(), fast_retry());
        let batch = sample_batch();
        let export = ExportConfig::new(ExportFormat::Png, dir.path());

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::Replace, &export)
            .await;
        assert!(outcome.is_success());
        assert_eq!(renderer.transforms.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.exports.load(Ordering::SeqCst), 0);
        assert!(outcome.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_export_writes_one_artifact_per_target_and_scale() {
        let renderer = Arc::new(FakeRenderer::ok());
        let dir = TempDir::new().unwrap();
        let executor = BatchExecutor::new(renderer.clone(), None, dir.path(), fast_retry());
        let batch = sample_batch();
        let export =
            ExportConfig::new(ExportFormat::Png, dir.path()).with_scales(vec![1.0, 2.0]);

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::Export, &export)
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.artifacts.len(), 4);
        let first = &outcome.artifacts[0];
        assert_eq!(first.filename, "1:1_1x.png");
        assert!(first.local_path.exists());
        assert_eq!(first.size_bytes, 16);
    }

    #[tokio::test]
    async fn test_transform_failure_aborts_attempt() {
        let renderer = Arc::new(FakeRenderer {
            fail_transform_on: Some("1:2".to_string()),
            ..FakeRenderer::ok()
        });
        let dir = TempDir::new().unwrap();
        let executor = BatchExecutor::new(renderer.clone(), None, dir.path(), fast_retry());
        let batch = sample_batch();
        let export = ExportConfig::new(ExportFormat::Png, dir.path());

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::ReplaceThenExport, &export)
            .await;
        assert!(!outcome.is_success());
        assert!(matches!(outcome.error, Some(Error::Transform(_))));
        // Export never started.
        assert_eq!(renderer.exports.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_export_failure_keeps_earlier_artifacts() {
        let renderer = Arc::new(FakeRenderer {
            fail_export: true,
            ..FakeRenderer::ok()
        });
        let dir = TempDir::new().unwrap();
        let executor = BatchExecutor::new(renderer, None, dir.path(), fast_retry());
        let batch = sample_batch();
        let export = ExportConfig::new(ExportFormat::Png, dir.path());

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::Export, &export)
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_transient_upload_failure_is_retried_to_delivery() {
        let renderer = Arc::new(FakeRenderer::ok());
        let dir = TempDir::new().unwrap();
        let uploader = Arc::new(FlakyUploader::failing_first(2));
        let executor = BatchExecutor::new(renderer, Some(uploader.clone()), dir.path(), fast_retry());
        let batch = sample_batch();
        let export = ExportConfig::new(ExportFormat::Png, dir.path())
            .with_remote_destination("s3://bucket/exports");

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::Export, &export)
            .await;
        assert!(outcome.is_success());
        assert!(!outcome.degraded_delivery);
        assert!(outcome.artifacts.iter().all(|a| a.remote_uri.is_some()));
        // Two failed attempts before the first delivery, then one call
        // per remaining artifact.
        assert_eq!(
            uploader.calls.load(Ordering::SeqCst),
            2 + outcome.artifacts.len()
        );
    }

    #[tokio::test]
    async fn test_exhausted_upload_retries_degrade_instead_of_failing() {
        let renderer = Arc::new(FakeRenderer::ok());
        let dir = TempDir::new().unwrap();
        let uploader = Arc::new(FlakyUploader::failing_first(usize::MAX));
        let executor = BatchExecutor::new(renderer, Some(uploader.clone()), dir.path(), fast_retry());
        let batch = sample_batch();
        let export = ExportConfig::new(ExportFormat::Png, dir.path())
            .with_remote_destination("s3://bucket/exports");

        let outcome = executor
            .execute(&batch, "doc-1", TransformKind::Export, &export)
            .await;
        assert!(outcome.is_success());
        assert!(outcome.degraded_delivery);
        assert!(outcome.artifacts.iter().all(|a| a.remote_uri.is_none()));
        assert!(outcome.artifacts.iter().all(|a| a.local_path.exists()));
        // Initial attempt plus three retries, per artifact.
        assert_eq!(
            uploader.calls.load(Ordering::SeqCst),
            4 * outcome.artifacts.len()
        );
    }
}
