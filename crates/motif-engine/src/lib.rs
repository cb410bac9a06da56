//! Bulk transformation orchestration for motif.
//!
//! The engine takes a document reference and a set of selector rules,
//! resolves them to concrete targets, partitions the targets into
//! batches, and drives the batches through an external renderer with
//! bounded concurrency, retry with backoff, admission control, and
//! checkpointed progress.
//!
//! ```no_run
//! use std::sync::Arc;
//! use motif_core::{ContentElement, EngineConfig, ExportConfig, ExportFormat, TransformKind};
//! use motif_engine::{Engine, HttpRenderer, RendererConfig, SelectorRule, SubmitRequest};
//! use motif_store::MemoryJobStore;
//!
//! # async fn example() -> motif_core::Result<()> {
//! let renderer = Arc::new(HttpRenderer::new(RendererConfig::from_env()?)?);
//! let engine = Engine::new(
//!     EngineConfig::from_env(),
//!     Arc::new(MemoryJobStore::new()),
//!     renderer.clone(),
//!     renderer,
//!     None,
//! );
//! let job_id = engine
//!     .submit_job(SubmitRequest {
//!         document_ref: "doc-key".to_string(),
//!         rules: vec![SelectorRule {
//!             selector: "hero-*".to_string(),
//!             payload: ContentElement::Text { content: "Hello".to_string() },
//!         }],
//!         kind: TransformKind::Replace,
//!         export: ExportConfig::new(ExportFormat::Png, "./exports"),
//!         batch_size: None,
//!     })
//!     .await?;
//! let _report = engine.job_status(job_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod executor;
pub mod orchestrator;
pub mod partition;
pub mod progress;
pub mod renderer;
pub mod resolver;
pub mod retry;

pub use engine::{Engine, EngineEvent, SubmitRequest};
pub use executor::{BatchExecutor, BatchOutcome};
pub use orchestrator::{Admission, QueueOrchestrator};
pub use renderer::{HttpRenderer, RendererConfig};
pub use resolver::{PatternResolver, ResolvedTargets, SelectorRule};
pub use retry::RetryPolicy;
