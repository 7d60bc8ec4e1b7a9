pub mod agents;
pub mod api;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod fusion;
pub mod ingestion;
pub mod llm;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod resources;
pub mod vector_store;
