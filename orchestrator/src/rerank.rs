//! Cross-encoder re-ranking of the fused candidate set.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::RerankError;
use crate::models::{Candidate, RetrievalSet, ScoreScheme};

pub const DEFAULT_RERANK_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

#[async_trait]
pub trait Reranker: Send + Sync {
    fn id(&self) -> &str;

    /// One relevance score per document, in document order. Higher is better.
    async fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError>;
}

/// HTTP client for a cross-encoder sidecar exposing `POST /rerank`.
pub struct CrossEncoderClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl CrossEncoderClient {
    pub fn connect(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "re-rank URL must be an http(s) URL"
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build re-rank HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [&'a str],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

#[async_trait]
impl Reranker for CrossEncoderClient {
    fn id(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&RerankRequest { query, documents })
            .send()
            .await
            .map_err(|err| RerankError::Unavailable(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RerankError::Unavailable(format!("re-rank sidecar returned {}", status)));
        }

        let parsed: RerankResponse = resp
            .json()
            .await
            .map_err(|err| RerankError::Contract(format!("unreadable re-rank response: {}", err)))?;
        Ok(parsed.scores)
    }
}

/// Re-scores `fused` against the original query and re-sorts it. The returned
/// set keeps every input candidate.
#[instrument(skip_all, fields(reranker = reranker.id(), candidates = fused.len()))]
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    fused: &RetrievalSet,
) -> Result<RetrievalSet, RerankError> {
    if fused.is_empty() {
        return Ok(RetrievalSet::empty(ScoreScheme::Rerank));
    }

    let documents: Vec<&str> = fused
        .candidates()
        .iter()
        .map(|candidate| candidate.chunk.content.as_str())
        .collect();
    let scores = reranker.score(query, &documents).await?;
    if scores.len() != documents.len() {
        return Err(RerankError::Contract(format!(
            "expected {} scores, got {}",
            documents.len(),
            scores.len()
        )));
    }

    let rescored: Vec<Candidate> = fused
        .candidates()
        .iter()
        .zip(scores)
        .map(|(candidate, score)| Candidate {
            chunk: candidate.chunk.clone(),
            score: if score.is_finite() {
                f64::from(score)
            } else {
                f64::NEG_INFINITY
            },
            rank: candidate.rank,
        })
        .collect();

    let set = RetrievalSet::new(rescored, ScoreScheme::Rerank, fused.len());
    debug!(top = ?set.candidates().first().map(|c| c.chunk.id.as_str()), "re-rank complete");
    Ok(set)
}
