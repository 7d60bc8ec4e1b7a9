use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::agents::ComplianceAgent;
use crate::ingestion::IngestionService;
use crate::middleware::{rate_limit, SharedLimiter};
use crate::pipeline::RagPipeline;

mod ingest;
mod query;
mod rules;

pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppContext {
    pub pipeline: Arc<RagPipeline>,
    pub compliance: Arc<ComplianceAgent>,
    pub ingestion: Arc<IngestionService>,
    pub limiter: SharedLimiter,
}

pub fn routes(ctx: AppContext) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let ingest_route = api
        .and(warp::path("ingest"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES)) // 100MB max
        .and(with_shared(ctx.ingestion.clone()))
        .and_then(ingest::handle_ingest);

    let query_route = api
        .and(warp::path("query"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limit(ctx.limiter.clone()))
        .and(warp::body::json())
        .and(with_shared(ctx.pipeline.clone()))
        .and_then(query::handle_query);

    let rules_route = api
        .and(warp::path("rules"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limit(ctx.limiter.clone()))
        .and(warp::body::json())
        .and(with_shared(ctx.compliance.clone()))
        .and_then(rules::handle_rules);

    ingest_route.or(query_route).or(rules_route)
}

fn with_shared<T: Send + Sync + ?Sized>(
    handle: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || handle.clone())
}
