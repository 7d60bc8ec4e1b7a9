use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;
use warp::{Rejection, Reply};

use crate::agents::ComplianceAgent;
use crate::error::ApiError;
use crate::models::{RuleRequest, RuleResponse};

pub async fn handle_rules(
    request: RuleRequest,
    compliance: Arc<ComplianceAgent>,
) -> Result<impl Reply, Rejection> {
    if request.organization_context.trim().is_empty() && request.custom_rules.trim().is_empty() {
        return Err(warp::reject::custom(ApiError::BadRequest(
            "organization_context or custom_rules is required".to_string(),
        )));
    }

    let request_id = Uuid::new_v4();
    let span = info_span!("rules", %request_id);

    async move {
        info!("Generating compliant rules");

        let audit = compliance
            .generate_compliant_rules(&request.organization_context, &request.custom_rules)
            .await
            .map_err(|err| {
                error!(error = %err, "rule generation aborted");
                warp::reject::custom(ApiError::from(err))
            })?;

        Ok::<_, Rejection>(warp::reply::json(&RuleResponse::from_audit(request_id, audit)))
    }
    .instrument(span)
    .await
}
