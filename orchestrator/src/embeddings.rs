//! Dense and sparse embedding providers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::EmbedError;
use crate::models::SparseVector;

#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    /// One sparse vector per input text, in input order.
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbedError>;
}

/// Client for the embedding service that hosts both the dense model and the
/// SPLADE-style sparse model.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    /// Builds the client and probes `/health`; a failed probe means the model
    /// is not loaded.
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "embedding service URL must be an http(s) URL"
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .with_context(|| format!("embedding service at {} is unreachable", base_url))?;
        anyhow::ensure!(
            resp.status().is_success(),
            "embedding service health check returned {}",
            resp.status()
        );
        info!(url = %base_url, "embedding service ready");

        Ok(Self { client, base_url })
    }

    async fn post<R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        texts: &[String],
    ) -> Result<R, EmbedError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|err| EmbedError::Unavailable(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbedError::Unavailable(format!("{} returned {}: {}", path, status, body)));
        }

        resp.json()
            .await
            .map_err(|err| EmbedError::Contract(format!("failed to parse {} response: {}", path, err)))
    }
}

#[async_trait]
impl DenseEmbedder for HttpEmbedder {
    #[instrument(skip_all, fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload: DenseResponse = self.post("/embed", texts).await?;
        ensure_count(payload.embeddings.len(), texts.len())?;
        Ok(payload.embeddings)
    }
}

#[async_trait]
impl SparseEmbedder for HttpEmbedder {
    #[instrument(skip_all, fields(count = texts.len()))]
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload: SparseResponse = self.post("/embed/sparse", texts).await?;
        ensure_count(payload.embeddings.len(), texts.len())?;
        if let Some(bad) = payload.embeddings.iter().position(|v| !v.is_well_formed()) {
            return Err(EmbedError::Contract(format!(
                "sparse vector {} has mismatched indices/values",
                bad
            )));
        }
        Ok(payload.embeddings)
    }
}

fn ensure_count(got: usize, expected: usize) -> Result<(), EmbedError> {
    if got == expected {
        Ok(())
    } else {
        Err(EmbedError::Contract(format!(
            "embedding service returned {} vectors for {} inputs",
            got, expected
        )))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DenseResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct SparseResponse {
    embeddings: Vec<SparseVector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_is_a_contract_violation() {
        assert!(ensure_count(2, 2).is_ok());
        assert!(matches!(ensure_count(1, 2), Err(EmbedError::Contract(_))));
    }

    #[test]
    fn sparse_payload_parses() {
        let parsed: SparseResponse = serde_json::from_value(serde_json::json!({
            "embeddings": [{"indices": [3, 17], "values": [0.5, 1.25]}]
        }))
        .unwrap();
        assert_eq!(parsed.embeddings[0].indices, vec![3, 17]);
        assert!(parsed.embeddings[0].is_well_formed());
    }

    #[tokio::test]
    async fn connect_rejects_non_http_urls() {
        let err = HttpEmbedder::connect("localhost:8002", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("http(s)"));
    }
}
