//! HTTP client for the external document/render service.
//!
//! Implements both [`DocumentProvider`] and [`Renderer`] against the
//! service's REST surface. Every call here is rate-limited upstream by the
//! orchestrator's worker pool, so the client itself stays simple.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use motif_core::{
    ContentElement, DocumentNode, DocumentProvider, Error, ExportConfig, ExportFormat, Renderer,
    Result,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the render service.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl RendererConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MOTIF_RENDERER_URL` | Base URL of the render service (required) |
    /// | `MOTIF_RENDERER_TOKEN` | API token (required) |
    /// | `MOTIF_RENDERER_TIMEOUT_SECS` | Request timeout, default 30 |
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("MOTIF_RENDERER_URL")
            .map_err(|_| Error::Config("MOTIF_RENDERER_URL is not set".to_string()))?;
        let api_token = std::env::var("MOTIF_RENDERER_TOKEN")
            .map_err(|_| Error::Config("MOTIF_RENDERER_TOKEN is not set".to_string()))?;
        let timeout = std::env::var("MOTIF_RENDERER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            base_url,
            api_token,
            timeout: Duration::from_secs(timeout),
        })
    }
}

/// REST client for the render service.
pub struct HttpRenderer {
    client: reqwest::Client,
    config: RendererConfig,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    nodes: Vec<DocumentNode>,
}

impl HttpRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn document_url(&self, document_ref: &str) -> String {
        format!(
            "{}/v1/documents/{}",
            self.config.base_url.trim_end_matches('/'),
            document_ref
        )
    }

    fn content_url(&self, document_ref: &str, target_id: &str) -> String {
        format!(
            "{}/targets/{}/content",
            self.document_url(document_ref),
            target_id
        )
    }

    fn export_url(&self, document_ref: &str) -> String {
        format!("{}/export", self.document_url(document_ref))
    }
}

#[async_trait]
impl DocumentProvider for HttpRenderer {
    async fn get_document(&self, document_ref: &str) -> Result<Vec<DocumentNode>> {
        let response = self
            .client
            .get(self.document_url(document_ref))
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::InvalidDocument(format!(
                "document '{document_ref}' not found"
            )));
        }
        if !response.status().is_success() {
            return Err(Error::InvalidDocument(format!(
                "document fetch failed with status {}",
                response.status()
            )));
        }
        let body: DocumentResponse = response.json().await?;
        debug!(document_ref, node_count = body.nodes.len(), "document fetched");
        Ok(body.nodes)
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn transform(
        &self,
        document_ref: &str,
        target_id: &str,
        payload: &ContentElement,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.content_url(document_ref, target_id))
            .bearer_auth(&self.config.api_token)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transform(format!(
                "content replacement on target '{target_id}' failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn export(
        &self,
        document_ref: &str,
        target_id: &str,
        format: ExportFormat,
        scale: f32,
        config: &ExportConfig,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.export_url(document_ref))
            .bearer_auth(&self.config.api_token)
            .query(&[
                ("target", target_id),
                ("format", format.as_str()),
                ("scale", &scale.to_string()),
                ("contents_only", &config.contents_only.to_string()),
                ("use_absolute_bounds", &config.use_absolute_bounds.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transform(format!(
                "export of target '{target_id}' failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
