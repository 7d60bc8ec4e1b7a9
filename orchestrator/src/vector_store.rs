//! Vector store contract and its Qdrant REST implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::models::{Candidate, Chunk, EmbeddedChunk, SparseVector};

pub const PAYLOAD_CONTENT_KEY: &str = "page_content";
pub const PAYLOAD_PAGE_KEY: &str = "page_number";

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// `Ok(false)` means "not ingested yet"; connection problems are errors.
    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    async fn search_dense(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;

    async fn search_sparse(
        &self,
        collection: &str,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;

    /// Drops the collection if present and creates it empty.
    async fn recreate_collection(&self, collection: &str, dense_size: usize) -> Result<(), StoreError>;

    async fn upsert(&self, collection: &str, points: &[EmbeddedChunk]) -> Result<(), StoreError>;
}

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    dense_name: String,
    sparse_name: String,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        dense_name: &str,
        sparse_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Qdrant URL must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                "api-key",
                HeaderValue::from_str(key.trim()).context("invalid Qdrant API key")?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dense_name: dense_name.to_string(),
            sparse_name: sparse_name.to_string(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection)
    }

    async fn send(&self, collection: &str, request: RequestBuilder) -> Result<Value, StoreError> {
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|err| StoreError::Contract(format!("unreadable Qdrant response: {}", err)));
        }

        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(status_error(collection, status, body))
    }

    async fn query(&self, collection: &str, body: Value) -> Result<Vec<Candidate>, StoreError> {
        let request = self
            .client
            .post(format!("{}/points/query", self.collection_url(collection)))
            .json(&body);
        let response = self.send(collection, request).await?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .map_err(|err| StoreError::Contract(format!("unexpected query response: {}", err)))?;

        parsed
            .result
            .points
            .into_iter()
            .enumerate()
            .map(|(position, point)| point.into_candidate(position + 1))
            .collect()
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let request = self
            .client
            .get(format!("{}/exists", self.collection_url(collection)));
        let response = self.send(collection, request).await?;
        response["result"]["exists"]
            .as_bool()
            .ok_or_else(|| StoreError::Contract("exists response missing result.exists".to_string()))
    }

    #[instrument(skip(self, vector), fields(dim = vector.len()))]
    async fn search_dense(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let body = json!({
            "query": vector,
            "using": self.dense_name,
            "limit": limit,
            "with_payload": true,
        });
        let hits = self.query(collection, body).await?;
        debug!(hits = hits.len(), "dense search complete");
        Ok(hits)
    }

    #[instrument(skip(self, vector), fields(terms = vector.indices.len()))]
    async fn search_sparse(
        &self,
        collection: &str,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let body = json!({
            "query": { "indices": vector.indices, "values": vector.values },
            "using": self.sparse_name,
            "limit": limit,
            "with_payload": true,
        });
        let hits = self.query(collection, body).await?;
        debug!(hits = hits.len(), "sparse search complete");
        Ok(hits)
    }

    async fn recreate_collection(&self, collection: &str, dense_size: usize) -> Result<(), StoreError> {
        match self
            .send(collection, self.client.delete(self.collection_url(collection)))
            .await
        {
            Ok(_) => info!(collection, "deleted existing collection"),
            Err(StoreError::CollectionMissing(_)) => {}
            Err(err) => return Err(err),
        }

        let body = json!({
            "vectors": { self.dense_name.as_str(): { "size": dense_size, "distance": "Cosine" } },
            "sparse_vectors": { self.sparse_name.as_str(): {} },
        });
        self.send(collection, self.client.put(self.collection_url(collection)).json(&body))
            .await?;
        info!(collection, dense_size, "created collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: &[EmbeddedChunk]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let points: Vec<Value> = points
            .iter()
            .map(|point| point_body(point, &self.dense_name, &self.sparse_name))
            .collect();
        let request = self
            .client
            .put(format!("{}/points", self.collection_url(collection)))
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }));
        self.send(collection, request).await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn status_error(collection: &str, status: StatusCode, body: String) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        StoreError::CollectionMissing(collection.to_string())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StoreError::Unavailable(format!("Qdrant returned {}: {}", status, body))
    } else {
        StoreError::Contract(format!("Qdrant returned {}: {}", status, body))
    }
}

fn point_body(point: &EmbeddedChunk, dense_name: &str, sparse_name: &str) -> Value {
    let mut vector = Map::new();
    vector.insert(dense_name.to_string(), json!(point.dense));
    vector.insert(
        sparse_name.to_string(),
        json!({ "indices": point.sparse.indices, "values": point.sparse.values }),
    );
    json!({
        "id": point.chunk.id,
        "vector": vector,
        "payload": {
            PAYLOAD_CONTENT_KEY: point.chunk.content,
            PAYLOAD_PAGE_KEY: point.chunk.source_page,
        },
    })
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl ScoredPoint {
    fn into_candidate(self, rank: usize) -> Result<Candidate, StoreError> {
        let id = match self.id {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            other => {
                return Err(StoreError::Contract(format!("unsupported point id {}", other)));
            }
        };
        let payload = self.payload.unwrap_or_default();
        let content = payload
            .get(PAYLOAD_CONTENT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // anything that is not a non-negative integer is an unknown page
        let source_page = payload
            .get(PAYLOAD_PAGE_KEY)
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok());

        Ok(Candidate {
            chunk: Chunk {
                id,
                content,
                source_page,
            },
            score: f64::from(self.score),
            rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_become_ranked_candidates() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "result": {"points": [
                {"id": 7, "score": 0.91, "payload": {"page_content": "Employees must provide 30 days notice.", "page_number": 4}},
                {"id": "5f0c7a6e-1111-4c2b-9b1e-1a2b3c4d5e6f", "score": 0.42, "payload": {"page_content": "Other", "page_number": "?"}}
            ]},
            "status": "ok"
        }))
        .unwrap();
        let candidates: Vec<Candidate> = parsed
            .result
            .points
            .into_iter()
            .enumerate()
            .map(|(i, p)| p.into_candidate(i + 1).unwrap())
            .collect();

        assert_eq!(candidates[0].chunk.id, "7");
        assert_eq!(candidates[0].chunk.source_page, Some(4));
        assert_eq!(candidates[0].rank, 1);
        assert_eq!(candidates[1].chunk.source_page, None);
        assert_eq!(candidates[1].rank, 2);
    }

    #[test]
    fn missing_payload_yields_empty_content() {
        let point = ScoredPoint {
            id: json!(1),
            score: 0.1,
            payload: None,
        };
        let candidate = point.into_candidate(1).unwrap();
        assert!(candidate.chunk.content.is_empty());
        assert_eq!(candidate.chunk.source_page, None);
    }

    #[test]
    fn object_ids_are_rejected() {
        let point = ScoredPoint {
            id: json!({"weird": true}),
            score: 0.1,
            payload: None,
        };
        assert!(matches!(point.into_candidate(1), Err(StoreError::Contract(_))));
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(
            status_error("docs", StatusCode::NOT_FOUND, String::new()),
            StoreError::CollectionMissing("docs".to_string())
        );
        assert!(matches!(
            status_error("docs", StatusCode::SERVICE_UNAVAILABLE, String::new()),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            status_error("docs", StatusCode::BAD_REQUEST, String::new()),
            StoreError::Contract(_)
        ));
    }

    #[test]
    fn upsert_body_names_both_vectors() {
        let point = EmbeddedChunk {
            chunk: Chunk::new("abc", "text", Some(2)),
            dense: vec![0.1, 0.2],
            sparse: SparseVector {
                indices: vec![5],
                values: vec![0.7],
            },
        };
        let body = point_body(&point, "dense_vector", "sparse_vector");
        assert_eq!(body["id"], "abc");
        assert_eq!(body["vector"]["sparse_vector"]["indices"][0], 5);
        assert_eq!(body["payload"]["page_number"], 2);
        assert_eq!(body["payload"]["page_content"], "text");
    }
}
