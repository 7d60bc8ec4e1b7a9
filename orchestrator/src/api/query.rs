use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;
use warp::{Rejection, Reply};

use crate::error::ApiError;
use crate::models::{QueryRequest, QueryResponse};
use crate::pipeline::RagPipeline;

pub async fn handle_query(
    request: QueryRequest,
    pipeline: Arc<RagPipeline>,
) -> Result<impl Reply, Rejection> {
    if request.query.trim().is_empty() {
        return Err(warp::reject::custom(ApiError::BadRequest(
            "query must not be empty".to_string(),
        )));
    }

    let request_id = Uuid::new_v4();
    let span = info_span!("query", %request_id);

    async move {
        info!(history = request.chat_history.len(), "Processing query");

        let outcome = pipeline
            .run(&request.query, &request.chat_history)
            .await
            .map_err(|err| {
                error!(error = %err, "query pipeline aborted");
                warp::reject::custom(ApiError::from(err))
            })?;

        let response = QueryResponse {
            request_id,
            answer: outcome.answer,
            status: outcome.status,
            documents: outcome.documents,
            citations: outcome.citations,
            timings: outcome.timings,
            refined_queries: outcome.refined_queries,
        };
        Ok::<_, Rejection>(warp::reply::json(&response))
    }
    .instrument(span)
    .await
}
