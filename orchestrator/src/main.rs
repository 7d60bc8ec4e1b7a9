use std::sync::Arc;

use tracing::{error, info};
use warp::{Filter, Reply};

use rag_orchestrator::agents::{ComplianceAgent, RefinerAgent, RetrieverAgent, SummarizerAgent};
use rag_orchestrator::api::{self, AppContext};
use rag_orchestrator::config::Config;
use rag_orchestrator::context::ContextBudget;
use rag_orchestrator::error::handle_rejection;
use rag_orchestrator::ingestion::{HttpExtractor, IngestionService};
use rag_orchestrator::llm::{GeminiBackend, GenerationClient, RetryPolicy};
use rag_orchestrator::metrics;
use rag_orchestrator::middleware;
use rag_orchestrator::pipeline::RagPipeline;
use rag_orchestrator::resources::Resources;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting Hybrid RAG Orchestrator");
    info!(
        collection = %config.collection_name,
        model = %config.llm_model,
        refine_mode = ?config.refine_mode,
        rerank = config.rerank_url.is_some(),
        "Configuration loaded"
    );

    // Retrieval handles are loaded on first use
    let resources = Arc::new(Resources::from_config(&config));

    let backend = GeminiBackend::new(
        config.llm_api_url.clone(),
        config.gemini_api_key.clone(),
        config.llm_timeout,
    )?;
    let llm = Arc::new(GenerationClient::new(
        Arc::new(backend),
        RetryPolicy {
            max_retries: config.llm_max_retries,
            base_delay: config.llm_backoff_base,
        },
    ));

    let budget = ContextBudget {
        top_k: config.retrieval.context_top_k,
        max_chars: config.retrieval.context_max_chars,
    };
    let retriever = Arc::new(RetrieverAgent::new(
        Arc::clone(&resources),
        config.collection_name.clone(),
        config.retrieval.clone(),
    ));
    let pipeline = RagPipeline::new(
        RefinerAgent::new(Arc::clone(&llm), config.refine_mode),
        Arc::clone(&retriever),
        SummarizerAgent::new(Arc::clone(&llm)),
        budget,
    );
    let compliance = ComplianceAgent::new(Arc::clone(&retriever), Arc::clone(&llm), budget);
    let ingestion = IngestionService::new(
        Arc::new(HttpExtractor::new(&config.ingestion_service_url, config.service_timeout)?),
        Arc::clone(&resources),
        config.collection_name.clone(),
        config.vector_size,
        config.chunk_size,
        config.chunk_overlap,
    );

    // Build API routes
    let api_routes = api::routes(AppContext {
        pipeline: Arc::new(pipeline),
        compliance: Arc::new(compliance),
        ingestion: Arc::new(ingestion),
        limiter: middleware::rate_limiter(config.rate_limit_per_sec),
    });

    // Health check route
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    // Metrics route
    let metrics_route = warp::path("metrics").and(warp::get()).map(|| match metrics::render() {
        Ok((buffer, content_type)) => {
            warp::reply::with_header(buffer, "Content-Type", content_type).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            warp::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    });

    let routes = health
        .or(metrics_route)
        .or(api_routes)
        .recover(handle_rejection)
        .with(warp::log("api"))
        .with(middleware::cors());

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", addr.1);

    warp::serve(routes).run(addr).await;

    Ok(())
}
