//! Process-wide retrieval handles, loaded on first use.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::{DenseEmbedder, HttpEmbedder, SparseEmbedder};
use crate::error::ResourceError;
use crate::rerank::{CrossEncoderClient, Reranker, DEFAULT_RERANK_MODEL};
use crate::vector_store::{QdrantStore, VectorStore};

type Loader<T> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<T>>> + Send + Sync>;

/// A shared handle that is created at most once. A failed load leaves the
/// cell empty, so the next caller tries again.
pub struct LazyResource<T: ?Sized> {
    name: &'static str,
    cell: OnceCell<Arc<T>>,
    loader: Loader<T>,
}

impl<T: ?Sized + Send + Sync + 'static> LazyResource<T> {
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<Arc<T>>> + Send + Sync + 'static,
    {
        Self {
            name,
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    /// Wraps an already constructed handle.
    pub fn ready(name: &'static str, value: Arc<T>) -> Self {
        Self {
            name,
            cell: OnceCell::new_with(Some(value)),
            loader: Box::new(move || {
                async move { Err::<Arc<T>, _>(anyhow::anyhow!("{} was provided pre-loaded", name)) }.boxed()
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<T>, ResourceError> {
        let value = self
            .cell
            .get_or_try_init(|| async {
                let loaded = (self.loader)().await;
                match &loaded {
                    Ok(_) => info!(resource = self.name, "resource loaded"),
                    Err(err) => warn!(resource = self.name, error = %format!("{:#}", err), "resource load failed"),
                }
                loaded
            })
            .await
            .map_err(|err| ResourceError::LoadFailed {
                name: self.name,
                message: format!("{:#}", err),
            })?;
        Ok(Arc::clone(value))
    }
}

/// Handles shared by every turn.
pub struct Resources {
    pub dense: LazyResource<dyn DenseEmbedder>,
    pub sparse: LazyResource<dyn SparseEmbedder>,
    pub store: LazyResource<dyn VectorStore>,
    /// `None` disables re-ranking.
    pub reranker: Option<LazyResource<dyn Reranker>>,
}

impl Resources {
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.service_timeout;

        let url = config.embedding_service_url.clone();
        let dense: LazyResource<dyn DenseEmbedder> = LazyResource::new("dense embedder", move || {
            let url = url.clone();
            async move {
                let embedder = HttpEmbedder::connect(&url, timeout).await?;
                Ok::<_, anyhow::Error>(Arc::new(embedder) as Arc<dyn DenseEmbedder>)
            }
            .boxed()
        });

        let url = config.embedding_service_url.clone();
        let sparse: LazyResource<dyn SparseEmbedder> = LazyResource::new("sparse embedder", move || {
            let url = url.clone();
            async move {
                let embedder = HttpEmbedder::connect(&url, timeout).await?;
                Ok::<_, anyhow::Error>(Arc::new(embedder) as Arc<dyn SparseEmbedder>)
            }
            .boxed()
        });

        let qdrant_url = config.qdrant_url.clone();
        let api_key = config.qdrant_api_key.clone();
        let dense_name = config.dense_vector_name.clone();
        let sparse_name = config.sparse_vector_name.clone();
        let store: LazyResource<dyn VectorStore> = LazyResource::new("vector store", move || {
            let result = QdrantStore::new(
                &qdrant_url,
                api_key.as_deref(),
                &dense_name,
                &sparse_name,
                timeout,
            )
            .map(|store| Arc::new(store) as Arc<dyn VectorStore>);
            async move { result }.boxed()
        });

        let reranker = config.rerank_url.clone().map(|url| {
            LazyResource::<dyn Reranker>::new("re-ranker", move || {
                let result = CrossEncoderClient::connect(&url, DEFAULT_RERANK_MODEL, timeout)
                    .map(|client| Arc::new(client) as Arc<dyn Reranker>);
                async move { result }.boxed()
            })
        });

        Self {
            dense,
            sparse,
            store,
            reranker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failed_load_is_retried_and_success_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resource: LazyResource<String> = LazyResource::new("flaky", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(anyhow::anyhow!("model file missing"))
                } else {
                    Ok(Arc::new("loaded".to_string()))
                }
            }
            .boxed()
        });

        let err = resource.get().await.unwrap_err();
        assert!(matches!(err, ResourceError::LoadFailed { name: "flaky", .. }));
        assert!(!resource.is_loaded());

        assert_eq!(resource.get().await.unwrap().as_str(), "loaded");
        assert_eq!(resource.get().await.unwrap().as_str(), "loaded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resource: Arc<LazyResource<u32>> = Arc::new(LazyResource::new("slow", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok::<_, anyhow::Error>(Arc::new(7))
            }
            .boxed()
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resource = Arc::clone(&resource);
                tokio::spawn(async move { *resource.get().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_resources_never_call_the_loader() {
        let resource = LazyResource::ready("preset", Arc::new(1u8));
        assert!(resource.is_loaded());
        assert_eq!(*resource.get().await.unwrap(), 1);
    }

    #[test]
    fn rerank_is_disabled_without_url() {
        let config = Config::from_lookup(|_| None).unwrap();
        let resources = Resources::from_config(&config);
        assert!(resources.reranker.is_none());
        assert!(!resources.store.is_loaded());
    }
}
