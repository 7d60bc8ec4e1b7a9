use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};

use crate::context::{DEFAULT_CONTEXT_MAX_CHARS, DEFAULT_CONTEXT_TOP_K};
use crate::fusion::{DEFAULT_FUSION_LIMIT, DEFAULT_PREFETCH_LIMIT, DEFAULT_RRF_K};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// How the refiner rewrites a question before retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineMode {
    /// One retrieval-oriented rewrite.
    Single,
    /// Exactly three diversified search queries.
    Multi,
}

impl FromStr for RefineMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "single" | "rewrite" => Ok(RefineMode::Single),
            "multi" | "multi_query" | "variants" => Ok(RefineMode::Multi),
            other => Err(anyhow!("unknown refine mode '{}'; use single or multi", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    /// Candidates drawn from each ranked list before fusion.
    pub prefetch_limit: usize,
    /// Length of the fused (and re-ranked) set handed to the context
    /// assembler. The context can never hold more than this many segments,
    /// so `context_top_k` only bites when it is the smaller of the two. With
    /// the defaults (5 and 10) the fusion limit is the effective bound; raise
    /// `FUSION_LIMIT` to let a re-ranker choose among more candidates.
    pub fusion_limit: usize,
    pub rrf_k: f64,
    /// Upper bound on segments in the context, applied after fusion.
    pub context_top_k: usize,
    pub context_max_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            prefetch_limit: DEFAULT_PREFETCH_LIMIT,
            fusion_limit: DEFAULT_FUSION_LIMIT,
            rrf_k: DEFAULT_RRF_K,
            context_top_k: DEFAULT_CONTEXT_TOP_K,
            context_max_chars: DEFAULT_CONTEXT_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub dense_vector_name: String,
    pub sparse_vector_name: String,
    pub vector_size: usize,
    pub embedding_service_url: String,
    pub rerank_url: Option<String>,
    pub ingestion_service_url: String,
    pub gemini_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: usize,
    pub llm_backoff_base: Duration,
    pub service_timeout: Duration,
    pub retrieval: RetrievalSettings,
    pub refine_mode: RefineMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub rate_limit_per_sec: u32,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup; missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let llm_model = string_or("LLM_MODEL", "gemini-2.5-flash");
        let llm_api_url = get("LLM_API_URL")
            .unwrap_or_else(|| format!("{}/{}:generateContent", GEMINI_BASE_URL, llm_model));

        let defaults = RetrievalSettings::default();
        let retrieval = RetrievalSettings {
            prefetch_limit: parse_or(&get, "PREFETCH_LIMIT", defaults.prefetch_limit)?,
            fusion_limit: parse_or(&get, "FUSION_LIMIT", defaults.fusion_limit)?,
            rrf_k: parse_or(&get, "RRF_K", defaults.rrf_k)?,
            context_top_k: parse_or(&get, "CONTEXT_TOP_K", defaults.context_top_k)?,
            context_max_chars: parse_or(&get, "CONTEXT_MAX_CHARS", defaults.context_max_chars)?,
        };

        let config = Config {
            port: parse_or(&get, "PORT", 8080)?,
            qdrant_url: string_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: get("QDRANT_API_KEY"),
            collection_name: string_or("COLLECTION_NAME", "pdf_rag_hybrid_collection"),
            dense_vector_name: string_or("DENSE_VECTOR_NAME", "dense_vector"),
            sparse_vector_name: string_or("SPARSE_VECTOR_NAME", "sparse_vector"),
            vector_size: parse_or(&get, "VECTOR_SIZE", 384)?,
            embedding_service_url: string_or("EMBEDDING_SERVICE_URL", "http://localhost:8002"),
            rerank_url: get("RERANK_URL"),
            ingestion_service_url: string_or("INGESTION_SERVICE_URL", "http://localhost:8001"),
            gemini_api_key: get("GEMINI_API_KEY"),
            llm_api_url,
            llm_model,
            llm_timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 60)?),
            llm_max_retries: parse_or(&get, "LLM_MAX_RETRIES", 2)?,
            llm_backoff_base: Duration::from_millis(parse_or(&get, "LLM_BACKOFF_BASE_MS", 1000)?),
            service_timeout: Duration::from_secs(parse_or(&get, "SERVICE_TIMEOUT_SECS", 30)?),
            retrieval,
            refine_mode: parse_or(&get, "REFINE_MODE", RefineMode::Multi)?,
            chunk_size: parse_or(&get, "CHUNK_SIZE", 500)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", 50)?,
            rate_limit_per_sec: parse_or(&get, "RATE_LIMIT_PER_SEC", 10)?,
            log_level: string_or("LOG_LEVEL", "info"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.vector_size > 0, "VECTOR_SIZE must be positive");
        ensure!(self.retrieval.prefetch_limit > 0, "PREFETCH_LIMIT must be positive");
        ensure!(self.retrieval.fusion_limit > 0, "FUSION_LIMIT must be positive");
        ensure!(self.retrieval.context_top_k > 0, "CONTEXT_TOP_K must be positive");
        ensure!(self.chunk_size > 0, "CHUNK_SIZE must be positive");
        ensure!(
            self.chunk_overlap < self.chunk_size,
            "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
            self.chunk_overlap,
            self.chunk_size
        );
        ensure!(self.rate_limit_per_sec > 0, "RATE_LIMIT_PER_SEC must be positive");
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value for {}='{}': {}", key, raw, err)),
        None => Ok(default),
    }
}
