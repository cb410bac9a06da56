//! Data model for the motif orchestration engine.
//!
//! Jobs, batches, queues, artifacts, the document arena, and the
//! delivery/checkpoint record shapes. All types serialize with serde;
//! manifests and checkpoints are plain JSON documents.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a bulk-transformation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Validating,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again; the job is only removed by
    /// the retention sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Status of a single batch within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// The transformation a job applies to its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Replace referenced assets only.
    Replace,
    /// Export rendered variants only.
    Export,
    /// Replace assets, then export the affected targets.
    ReplaceThenExport,
}

impl TransformKind {
    /// The admission queue this transformation kind is scheduled on.
    pub fn queue(&self) -> &'static str {
        match self {
            TransformKind::Replace => defaults::QUEUE_REPLACE,
            TransformKind::Export => defaults::QUEUE_EXPORT,
            TransformKind::ReplaceThenExport => defaults::QUEUE_BULK,
        }
    }
}

/// Payload applied to a target during a replace transformation.
///
/// Closed variant set dispatched via exhaustive match in the executor, so
/// adding a payload kind is a compile-time-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentElement {
    /// Replace the target's fill with the referenced image.
    Image { url: String },
    /// Replace the target's text content.
    Text { content: String },
    /// Replace a heading's content and level.
    Heading { content: String, level: u8 },
    /// Replace tabular content, row-major.
    Table { rows: Vec<Vec<String>> },
}

// =============================================================================
// EXPORT TYPES
// =============================================================================

/// Rendered artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl ExportFormat {
    /// File extension for artifacts of this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpg => "jpg",
            ExportFormat::Svg => "svg",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// Export configuration attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Scale factors to render. One artifact per target per scale.
    pub scales: Vec<f32>,
    /// Local directory artifacts are written under.
    pub output_dir: PathBuf,
    /// Remote destination for post-export delivery. `None` disables upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_destination: Option<String>,
    /// Exclude content that overlaps the target's bounds.
    #[serde(default = "default_true")]
    pub contents_only: bool,
    /// Render using absolute rather than layout bounds.
    #[serde(default)]
    pub use_absolute_bounds: bool,
}

fn default_true() -> bool {
    true
}

impl ExportConfig {
    pub fn new(format: ExportFormat, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            format,
            scales: vec![1.0],
            output_dir: output_dir.into(),
            remote_destination: None,
            contents_only: true,
            use_absolute_bounds: false,
        }
    }

    /// Set the scale factors to render.
    pub fn with_scales(mut self, scales: Vec<f32>) -> Self {
        self.scales = scales;
        self
    }

    /// Enable remote delivery to the given destination.
    pub fn with_remote_destination(mut self, destination: impl Into<String>) -> Self {
        self.remote_destination = Some(destination.into());
        self
    }

    /// Validate scale bounds and count.
    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(Error::InvalidInput("scales must not be empty".into()));
        }
        if self.scales.len() > defaults::MAX_SCALES {
            return Err(Error::InvalidInput(format!(
                "at most {} scale factors are supported",
                defaults::MAX_SCALES
            )));
        }
        for &scale in &self.scales {
            if !(defaults::SCALE_MIN..=defaults::SCALE_MAX).contains(&scale) {
                return Err(Error::InvalidInput(format!(
                    "scale {} out of range {}..={}",
                    scale,
                    defaults::SCALE_MIN,
                    defaults::SCALE_MAX
                )));
            }
        }
        Ok(())
    }
}

/// A rendered artifact produced by a batch execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub local_path: PathBuf,
    /// Remote URI when delivery succeeded; `None` means the local path is
    /// the authoritative copy (degraded delivery).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    pub format: ExportFormat,
    pub scale: f32,
    pub size_bytes: u64,
    pub target_id: String,
}

/// Render a scale factor for filenames: `2` -> `"2x"`, `1.5` -> `"1.5x"`.
pub fn scale_label(scale: f32) -> String {
    if scale.fract() == 0.0 {
        format!("{}x", scale as u32)
    } else {
        format!("{}x", scale)
    }
}

// =============================================================================
// JOB & BATCH
// =============================================================================

/// One bulk-transformation request spanning many targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Opaque reference to the target document.
    pub document_ref: String,
    pub kind: TransformKind,
    pub export: ExportConfig,
    /// Batch size the job was partitioned with.
    pub batch_size: usize,
    /// Queue the job's batches are admitted through.
    pub queue: String,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `Pending` with zeroed counters.
    pub fn new(
        document_ref: impl Into<String>,
        kind: TransformKind,
        export: ExportConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_ref: document_ref.into(),
            kind,
            export,
            batch_size,
            queue: kind.queue().to_string(),
            total_batches: 0,
            completed_batches: 0,
            failed_batches: 0,
            status: JobStatus::Pending,
            error_summary: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Number of batches still to reach a terminal state.
    pub fn remaining_batches(&self) -> usize {
        self.total_batches
            .saturating_sub(self.completed_batches + self.failed_batches)
    }
}

/// A target with its replacement payload, the atom of batch work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTarget {
    pub target_id: String,
    pub payload: ContentElement,
}

/// A bounded, disjoint subset of a job's targets; the unit of retry and
/// concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Monotonically increasing index within the job.
    pub index: usize,
    pub targets: Vec<BatchTarget>,
    pub status: BatchStatus,
    pub artifacts: Vec<Artifact>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(job_id: Uuid, index: usize, targets: Vec<BatchTarget>, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            index,
            targets,
            status: BatchStatus::Pending,
            artifacts: Vec::new(),
            retry_count: 0,
            max_retries,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Target ids in batch order.
    pub fn target_ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.target_id.as_str()).collect()
    }
}

// =============================================================================
// QUEUES & HEALTH
// =============================================================================

/// Per-queue counters. Queues are process-wide, created at orchestrator
/// initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    pub name: String,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub concurrency_limit: usize,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueState {
    pub fn new(name: impl Into<String>, concurrency_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            concurrency_limit,
            paused: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lifetime total of tasks this queue has seen.
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }

    /// Failure ratio over the queue's lifetime total.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

/// Aggregate queue snapshot returned by `queue_status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queues: Vec<QueueState>,
    pub total_pending: usize,
    pub total_running: usize,
    /// running / max_concurrent_tasks, clamped to 1.0.
    pub system_load: f64,
    pub last_updated: DateTime<Utc>,
}

/// Health classification derived from the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

/// System health report. Observability only: admission control uses raw
/// load, never this score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub score: f64,
    pub system_load: f64,
    pub total_pending: usize,
    pub total_running: usize,
    pub unhealthy_queues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

// =============================================================================
// STATUS, MANIFEST & CHECKPOINT RECORDS
// =============================================================================

/// Dry-run selector preview entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorMatch {
    pub selector: String,
    pub matched_targets: Vec<String>,
    pub count: usize,
}

/// Read-only job status view returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    pub message: String,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

/// Per-feature usage flags recorded in the delivery manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestFeatures {
    pub replace: bool,
    pub export: bool,
    /// False when any upload degraded to a local path.
    pub remote_delivery: bool,
}

/// Structured record of a finished job's outputs and statistics, persisted
/// as JSON next to the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryManifest {
    pub job_id: Uuid,
    pub document_ref: String,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub artifact_count: usize,
    pub output_dir: PathBuf,
    pub artifacts: Vec<Artifact>,
    pub features: ManifestFeatures,
    pub generated_at: DateTime<Utc>,
}

/// Durable snapshot of a job's terminal batches, enabling resume-after-
/// restart. Monotonic: a later snapshot never lists fewer terminal batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub completed_batch_ids: Vec<Uuid>,
    pub failed_batch_ids: Vec<Uuid>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Whether the snapshot lists the batch as terminal.
    pub fn contains(&self, batch_id: Uuid) -> bool {
        self.completed_batch_ids.contains(&batch_id) || self.failed_batch_ids.contains(&batch_id)
    }
}

// =============================================================================
// DOCUMENT ARENA
// =============================================================================

/// A node in the provider's document tree (wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

/// Flattened arena over a document tree.
///
/// Nodes live in a flat `Vec` with child edges stored as index lists, so
/// pattern resolution reads the arena concurrently without pointer-chasing.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    nodes: Vec<IndexedNode>,
    by_id: HashMap<String, usize>,
}

/// Arena entry: node identity plus child slots.
#[derive(Debug, Clone)]
pub struct IndexedNode {
    pub id: String,
    pub name: String,
    pub children: Vec<usize>,
}

impl DocumentIndex {
    /// Flatten a document tree into an arena, depth-first, preserving the
    /// provider's node order. Later duplicates of an id are ignored.
    pub fn from_tree(roots: &[DocumentNode]) -> Self {
        let mut index = DocumentIndex::default();
        for root in roots {
            index.insert_subtree(root);
        }
        index
    }

    fn insert_subtree(&mut self, node: &DocumentNode) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(IndexedNode {
            id: node.id.clone(),
            name: node.name.clone(),
            children: Vec::new(),
        });
        self.by_id.entry(node.id.clone()).or_insert(slot);
        let mut child_slots = Vec::with_capacity(node.children.len());
        for child in &node.children {
            child_slots.push(self.insert_subtree(child));
        }
        self.nodes[slot].children = child_slots;
        slot
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with the exact id exists.
    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Node name for an id, if present.
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(|&slot| self.nodes[slot].name.as_str())
    }

    /// Iterate `(id, name)` pairs in arena (document) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes.iter().map(|n| (n.id.as_str(), n.name.as_str()))
    }
}
