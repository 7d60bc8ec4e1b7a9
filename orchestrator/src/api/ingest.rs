use std::sync::Arc;

use bytes::Buf;
use futures::TryStreamExt;
use tracing::{error, info};
use warp::multipart::{FormData, Part};
use warp::{Rejection, Reply};

use crate::error::ApiError;
use crate::ingestion::IngestionService;

pub async fn handle_ingest(
    mut form: FormData,
    ingestion: Arc<IngestionService>,
) -> Result<impl Reply, Rejection> {
    info!("Starting document ingestion...");

    let mut upload = None;
    while let Some(part) = form.try_next().await.map_err(|err| {
        warp::reject::custom(ApiError::BadRequest(format!("invalid multipart body: {}", err)))
    })? {
        if part.name() == "file" {
            let filename = part.filename().unwrap_or("upload.pdf").to_string();
            let content_type = part
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = read_part(part).await?;
            upload = Some((filename, content_type, data));
        }
    }

    let Some((filename, content_type, data)) = upload.filter(|(_, _, data)| !data.is_empty()) else {
        return Err(warp::reject::custom(ApiError::BadRequest(
            "No file uploaded".to_string(),
        )));
    };

    info!(%filename, bytes = data.len(), "Ingesting file");
    let response = ingestion
        .ingest(&filename, &content_type, data)
        .await
        .map_err(|err| {
            error!(error = %err, "ingestion failed");
            warp::reject::custom(ApiError::from(err))
        })?;

    Ok(warp::reply::json(&response))
}

async fn read_part(part: Part) -> Result<Vec<u8>, Rejection> {
    part.stream()
        .try_fold(Vec::new(), |mut vec, data| async move {
            vec.extend_from_slice(data.chunk());
            Ok(vec)
        })
        .await
        .map_err(|err| warp::reject::custom(ApiError::BadRequest(format!("failed to read upload: {}", err))))
}
