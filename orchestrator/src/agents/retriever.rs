// Retriever Agent: hybrid dense + sparse search, RRF fusion and optional re-ranking

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{info, instrument, warn};

use crate::config::RetrievalSettings;
use crate::error::RetrievalError;
use crate::fusion::{fuse_many, RrfConfig};
use crate::models::{Candidate, RetrievalSet};
use crate::rerank::rerank;
use crate::resources::Resources;

pub struct RetrieverAgent {
    resources: Arc<Resources>,
    collection: String,
    settings: RetrievalSettings,
}

impl RetrieverAgent {
    pub fn new(resources: Arc<Resources>, collection: String, settings: RetrievalSettings) -> Self {
        Self {
            resources,
            collection,
            settings,
        }
    }

    /// Searches every query variant with both embeddings and fuses all the
    /// resulting lists. Re-ranking always scores against `original`.
    #[instrument(skip_all, fields(collection = %self.collection, variants = queries.len()))]
    pub async fn retrieve(
        &self,
        original: &str,
        queries: &[String],
    ) -> Result<RetrievalSet, RetrievalError> {
        let store = self.resources.store.get().await?;
        if !store.collection_exists(&self.collection).await? {
            warn!("Retriever: collection has not been ingested");
            return Err(RetrievalError::NotIngested);
        }

        let queries: Vec<String> = if queries.is_empty() {
            vec![original.to_string()]
        } else {
            queries.to_vec()
        };

        let dense = self.resources.dense.get().await?;
        let sparse = self.resources.sparse.get().await?;
        let (dense_vectors, sparse_vectors) =
            tokio::try_join!(dense.embed(&queries), sparse.embed_sparse(&queries))?;
        if dense_vectors.len() != queries.len() || sparse_vectors.len() != queries.len() {
            return Err(RetrievalError::Contract(format!(
                "{} queries produced {} dense and {} sparse vectors",
                queries.len(),
                dense_vectors.len(),
                sparse_vectors.len()
            )));
        }

        let limit = self.settings.prefetch_limit;
        let searches = dense_vectors
            .iter()
            .zip(sparse_vectors.iter())
            .map(|(dense_vector, sparse_vector)| {
                let store = Arc::clone(&store);
                async move {
                    tokio::try_join!(
                        store.search_dense(&self.collection, dense_vector, limit),
                        store.search_sparse(&self.collection, sparse_vector, limit),
                    )
                }
            });
        let hits = try_join_all(searches).await?;

        let lists: Vec<&[Candidate]> = hits
            .iter()
            .flat_map(|(dense_hits, sparse_hits)| [dense_hits.as_slice(), sparse_hits.as_slice()])
            .collect();
        let fused = fuse_many(
            &lists,
            &RrfConfig {
                k: self.settings.rrf_k,
                limit: self.settings.fusion_limit,
            },
        );
        if fused.is_empty() {
            info!("Retriever: no matching content");
            return Err(RetrievalError::NoMatches);
        }

        let ranked = self.rerank_or_keep(original, fused).await;
        info!(
            candidates = ranked.len(),
            scheme = ?ranked.scheme(),
            "Retriever: retrieved candidates"
        );
        Ok(ranked)
    }

    async fn rerank_or_keep(&self, original: &str, fused: RetrievalSet) -> RetrievalSet {
        let Some(reranker) = &self.resources.reranker else {
            return fused;
        };

        let reranker = match reranker.get().await {
            Ok(reranker) => reranker,
            Err(err) => {
                warn!(error = %err, "Retriever: re-ranker unavailable, keeping fusion order");
                return fused;
            }
        };

        match rerank(reranker.as_ref(), original, &fused).await {
            Ok(reranked) => reranked,
            Err(err) => {
                warn!(error = %err, "Retriever: re-rank failed, keeping fusion order");
                fused
            }
        }
    }
}
