//! Document ingestion: text extraction, chunking, embedding and indexing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EmbedError, IngestError};
use crate::models::{Chunk, EmbeddedChunk, IngestResponse};
use crate::resources::Resources;

pub const EMBED_BATCH_SIZE: usize = 50;

/// Text of one extracted page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub page: Option<u32>,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<Passage>, IngestError>;
}

/// Client for the extraction service's `POST /extract` endpoint.
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "ingestion service URL must be an http(s) URL"
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build extraction HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    passages: Vec<Passage>,
}

#[async_trait]
impl TextExtractor for HttpExtractor {
    async fn extract(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<Passage>, IngestError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|err| IngestError::Extraction(format!("invalid content type: {}", err)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/extract", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| IngestError::Extraction(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(IngestError::Extraction(format!(
                "extraction service returned {}",
                resp.status()
            )));
        }

        let parsed: ExtractResponse = resp
            .json()
            .await
            .map_err(|err| IngestError::Extraction(format!("unreadable extraction response: {}", err)))?;
        Ok(parsed.passages)
    }
}

pub struct IngestionService {
    extractor: Arc<dyn TextExtractor>,
    resources: Arc<Resources>,
    collection: String,
    vector_size: usize,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl IngestionService {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        resources: Arc<Resources>,
        collection: String,
        vector_size: usize,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            extractor,
            resources,
            collection,
            vector_size,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Replaces the collection's contents with the chunks of one document.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn ingest(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestResponse, IngestError> {
        let passages = self.extractor.extract(filename, content_type, bytes).await?;
        let pages = passages.len();
        info!(pages, "Ingestion: text extracted");

        let chunks_indexed = self.index_passages(&passages).await?;
        Ok(IngestResponse {
            collection: self.collection.clone(),
            filename: filename.to_string(),
            pages,
            chunks_indexed,
        })
    }

    /// Embeds everything before touching the store, so a failed embedding
    /// leaves the previous collection in place.
    pub async fn index_passages(&self, passages: &[Passage]) -> Result<usize, IngestError> {
        let chunks = split_pages(passages, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            return Err(IngestError::NoText);
        }

        let dense = self.resources.dense.get().await?;
        let sparse = self.resources.sparse.get().await?;

        let mut points = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let (dense_vectors, sparse_vectors) =
                tokio::try_join!(dense.embed(&texts), sparse.embed_sparse(&texts))?;
            if dense_vectors.len() != batch.len() || sparse_vectors.len() != batch.len() {
                return Err(EmbedError::Contract(format!(
                    "batch of {} produced {} dense and {} sparse vectors",
                    batch.len(),
                    dense_vectors.len(),
                    sparse_vectors.len()
                ))
                .into());
            }

            for ((chunk, dense), sparse) in batch.iter().zip(dense_vectors).zip(sparse_vectors) {
                if dense.len() != self.vector_size {
                    return Err(EmbedError::Contract(format!(
                        "expected {}-dimensional vectors, got {}",
                        self.vector_size,
                        dense.len()
                    ))
                    .into());
                }
                points.push(EmbeddedChunk {
                    chunk: chunk.clone(),
                    dense,
                    sparse,
                });
            }
        }

        let store = self.resources.store.get().await?;
        store.recreate_collection(&self.collection, self.vector_size).await?;
        for batch in points.chunks(EMBED_BATCH_SIZE) {
            store.upsert(&self.collection, batch).await?;
        }

        info!(chunks = points.len(), collection = %self.collection, "Ingestion: collection rebuilt");
        Ok(points.len())
    }
}

/// Splits every passage and tags the pieces with the passage's page.
pub fn split_pages(passages: &[Passage], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    passages
        .iter()
        .flat_map(|passage| {
            split_text(&passage.text, chunk_size, overlap)
                .into_iter()
                .map(|piece| Chunk::new(Uuid::new_v4().to_string(), piece, passage.page))
        })
        .collect()
}

/// Cuts `text` into pieces of at most `chunk_size` characters, consecutive
/// pieces sharing about `overlap` characters. Cuts prefer paragraph breaks,
/// then line breaks, then sentence ends, then any whitespace.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_cut(&chars, start + chunk_size / 2, hard_end).unwrap_or(hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }

        let mut next = end.saturating_sub(overlap).max(start + 1);
        // start the overlap on a word
        while next < end && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        start = next;
    }

    pieces
}

fn find_cut(chars: &[char], min: usize, max: usize) -> Option<usize> {
    let is_paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let is_line = |p: usize| chars[p - 1] == '\n';
    let is_sentence =
        |p: usize| p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?');
    let is_space = |p: usize| chars[p - 1].is_whitespace();

    let min = min.max(1);
    if min > max {
        return None;
    }
    let boundaries: [&dyn Fn(usize) -> bool; 4] = [&is_paragraph, &is_line, &is_sentence, &is_space];
    boundaries
        .iter()
        .find_map(|is_boundary| (min..=max).rev().find(|&p| is_boundary(p)))
}
