#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use rag_orchestrator::agents::{ComplianceAgent, RefinerAgent, RetrieverAgent, SummarizerAgent};
use rag_orchestrator::config::{RefineMode, RetrievalSettings};
use rag_orchestrator::context::ContextBudget;
use rag_orchestrator::embeddings::{DenseEmbedder, SparseEmbedder};
use rag_orchestrator::error::{EmbedError, GenerationError, IngestError, RerankError, StoreError};
use rag_orchestrator::ingestion::{IngestionService, Passage, TextExtractor};
use rag_orchestrator::llm::{CompletionBackend, CompletionRequest, GenerationClient, RetryPolicy};
use rag_orchestrator::models::{Candidate, Chunk, EmbeddedChunk, SparseVector};
use rag_orchestrator::pipeline::RagPipeline;
use rag_orchestrator::rerank::Reranker;
use rag_orchestrator::resources::{LazyResource, Resources};
use rag_orchestrator::vector_store::VectorStore;

pub const COLLECTION: &str = "pdf_rag_hybrid_collection";
pub const DIM: usize = 4;

pub fn hit(id: &str, content: &str, page: Option<u32>) -> Candidate {
    Candidate {
        chunk: Chunk::new(id, content, page),
        score: 0.0,
        rank: 0,
    }
}

/// Returns fixed vectors and counts calls.
#[derive(Default)]
pub struct MockEmbedder {
    pub calls: AtomicUsize,
    pub fail: bool,
    /// Returns one dense vector too few.
    pub short: bool,
}

#[async_trait]
impl DenseEmbedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedError::Unavailable("model not loaded".into()));
        }
        let count = if self.short { texts.len().saturating_sub(1) } else { texts.len() };
        Ok((0..count).map(|_| vec![0.5; DIM]).collect())
    }
}

#[async_trait]
impl SparseEmbedder for MockEmbedder {
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedError::Unavailable("model not loaded".into()));
        }
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, _)| SparseVector {
                indices: vec![i as u32],
                values: vec![1.0],
            })
            .collect())
    }
}

/// In-memory store returning preset hit lists for every search.
#[derive(Default)]
pub struct MockStore {
    pub exists: bool,
    pub unavailable: bool,
    pub dense_hits: Vec<Candidate>,
    pub sparse_hits: Vec<Candidate>,
    pub searches: AtomicUsize,
    pub recreated: AtomicUsize,
    pub upserted: Mutex<Vec<EmbeddedChunk>>,
}

impl MockStore {
    pub fn with_hits(dense_hits: Vec<Candidate>, sparse_hits: Vec<Candidate>) -> Self {
        Self {
            exists: true,
            dense_hits,
            sparse_hits,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorStore for MockStore {
    async fn collection_exists(&self, _collection: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.exists)
    }

    async fn search_dense(&self, _collection: &str, _vector: &[f32], limit: usize) -> Result<Vec<Candidate>, StoreError> {
        self.check()?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.dense_hits.iter().take(limit).cloned().collect())
    }

    async fn search_sparse(
        &self,
        _collection: &str,
        _vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        self.check()?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.sparse_hits.iter().take(limit).cloned().collect())
    }

    async fn recreate_collection(&self, _collection: &str, _dense_size: usize) -> Result<(), StoreError> {
        self.check()?;
        self.recreated.fetch_add(1, Ordering::SeqCst);
        self.upserted.lock().unwrap().clear();
        Ok(())
    }

    async fn upsert(&self, _collection: &str, points: &[EmbeddedChunk]) -> Result<(), StoreError> {
        self.check()?;
        self.upserted.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}

/// Records every request and answers from a script, then from `fallback`.
pub struct RecordingBackend {
    pub requests: Mutex<Vec<CompletionRequest>>,
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: Result<String, GenerationError>,
}

impl RecordingBackend {
    pub fn scripted(replies: Vec<Result<String, GenerationError>>, fallback: Result<String, GenerationError>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
            fallback,
        }
    }

    pub fn always(reply: &str) -> Self {
        Self::scripted(Vec::new(), Ok(reply.to_string()))
    }

    pub fn failing() -> Self {
        Self::scripted(Vec::new(), Err(GenerationError::Status { status: 503, body: "overloaded".into() }))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for RecordingBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub struct FailingReranker;

#[async_trait]
impl Reranker for FailingReranker {
    fn id(&self) -> &str {
        "failing"
    }

    async fn score(&self, _query: &str, _documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::Unavailable("sidecar down".into()))
    }
}

/// Scores later documents higher, reversing the fused order.
pub struct ReversingReranker {
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl Reranker for ReversingReranker {
    fn id(&self) -> &str {
        "reversing"
    }

    async fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok((0..documents.len()).map(|i| i as f32).collect())
    }
}

pub struct StaticExtractor(pub Vec<Passage>);

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract(&self, _filename: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<Vec<Passage>, IngestError> {
        Ok(self.0.clone())
    }
}

pub enum RerankSetup {
    Disabled,
    Ready(Arc<dyn Reranker>),
    LoadFails,
}

pub struct Harness {
    pub store: Arc<MockStore>,
    pub embedder: Arc<MockEmbedder>,
    pub backend: Arc<RecordingBackend>,
    pub pipeline: RagPipeline,
    pub compliance: ComplianceAgent,
    pub ingestion: IngestionService,
}

pub fn harness(store: MockStore, backend: RecordingBackend, rerank: RerankSetup) -> Harness {
    harness_with(store, MockEmbedder::default(), backend, rerank, RefineMode::Multi)
}

pub fn harness_with(
    store: MockStore,
    embedder: MockEmbedder,
    backend: RecordingBackend,
    rerank: RerankSetup,
    mode: RefineMode,
) -> Harness {
    let store = Arc::new(store);
    let embedder = Arc::new(embedder);
    let backend = Arc::new(backend);

    let reranker = match rerank {
        RerankSetup::Disabled => None,
        RerankSetup::Ready(reranker) => Some(LazyResource::ready("re-ranker", reranker)),
        RerankSetup::LoadFails => Some(LazyResource::<dyn Reranker>::new("re-ranker", || {
            async { Err::<Arc<dyn Reranker>, _>(anyhow::anyhow!("model weights missing")) }.boxed()
        })),
    };
    let resources = Arc::new(Resources {
        dense: LazyResource::ready("dense embedder", Arc::clone(&embedder) as Arc<dyn DenseEmbedder>),
        sparse: LazyResource::ready("sparse embedder", Arc::clone(&embedder) as Arc<dyn SparseEmbedder>),
        store: LazyResource::ready("vector store", Arc::clone(&store) as Arc<dyn VectorStore>),
        reranker,
    });

    let llm = Arc::new(GenerationClient::new(
        Arc::clone(&backend) as Arc<dyn CompletionBackend>,
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        },
    ));
    let budget = ContextBudget::default();
    let retriever = Arc::new(RetrieverAgent::new(
        Arc::clone(&resources),
        COLLECTION.to_string(),
        RetrievalSettings::default(),
    ));

    Harness {
        pipeline: RagPipeline::new(
            RefinerAgent::new(Arc::clone(&llm), mode),
            Arc::clone(&retriever),
            SummarizerAgent::new(Arc::clone(&llm)),
            budget,
        ),
        compliance: ComplianceAgent::new(Arc::clone(&retriever), Arc::clone(&llm), budget),
        ingestion: IngestionService::new(
            Arc::new(StaticExtractor(Vec::new())),
            Arc::clone(&resources),
            COLLECTION.to_string(),
            DIM,
            500,
            50,
        ),
        store,
        embedder,
        backend,
    }
}
