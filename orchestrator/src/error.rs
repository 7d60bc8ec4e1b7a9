use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

use crate::models::TurnStatus;

pub const NOT_INGESTED_MESSAGE: &str = "Collection not found. Please ingest a document.";
pub const NO_MATCHES_MESSAGE: &str = "No matching content found.";
pub const RESOURCE_UNAVAILABLE_MESSAGE: &str =
    "The knowledge base is temporarily unavailable (missing retrieval resources). Please try again later.";
pub const GENERATION_FAILED_MESSAGE: &str =
    "The answer could not be generated right now. Please try again in a moment.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

impl Reject for ApiError {}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (code, message, details) = if let Some(api_err) = err.find::<ApiError>() {
        let (code, message) = match api_err {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
            ApiError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            ApiError::Unavailable(_) => (StatusCode::BAD_GATEWAY, "Upstream service unavailable"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (code, message, api_err.to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "Bad request", body_err.to_string())
    } else {
        return Err(err);
    };

    let json = warp::reply::json(&serde_json::json!({
        "error": message,
        "details": details,
    }));

    Ok(warp::reply::with_status(json, code))
}

/// Vector store failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("collection '{0}' does not exist")]
    CollectionMissing(String),

    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("vector store contract violation: {0}")]
    Contract(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("embedding contract violation: {0}")]
    Contract(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RerankError {
    #[error("re-rank service unavailable: {0}")]
    Unavailable(String),

    #[error("re-rank contract violation: {0}")]
    Contract(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("{name} could not be loaded: {message}")]
    LoadFailed { name: &'static str, message: String },
}

/// Failures of a single generation request. Every variant except
/// `Exhausted` is retried by the generation client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("generation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation response was empty")]
    EmptyResponse,

    #[error("generation response could not be parsed: {0}")]
    Malformed(String),

    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<GenerationError>,
    },
}

/// Outcome of the retrieval stage when it does not produce candidates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("collection has not been ingested")]
    NotIngested,

    #[error("no matching content")]
    NoMatches,

    #[error("retrieval resources unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("retrieval contract violation: {0}")]
    Contract(String),
}

impl RetrievalError {
    pub fn user_message(&self) -> String {
        match self {
            RetrievalError::NotIngested => NOT_INGESTED_MESSAGE.to_string(),
            RetrievalError::NoMatches => NO_MATCHES_MESSAGE.to_string(),
            RetrievalError::ResourceUnavailable(_) | RetrievalError::Contract(_) => {
                RESOURCE_UNAVAILABLE_MESSAGE.to_string()
            }
        }
    }

    pub fn status(&self) -> TurnStatus {
        match self {
            RetrievalError::NotIngested => TurnStatus::NotIngested,
            RetrievalError::NoMatches => TurnStatus::NoMatches,
            RetrievalError::ResourceUnavailable(_) | RetrievalError::Contract(_) => {
                TurnStatus::ResourceUnavailable
            }
        }
    }
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CollectionMissing(_) => RetrievalError::NotIngested,
            StoreError::Unavailable(message) => RetrievalError::ResourceUnavailable(message),
            StoreError::Contract(message) => RetrievalError::Contract(message),
        }
    }
}

impl From<EmbedError> for RetrievalError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Unavailable(message) => RetrievalError::ResourceUnavailable(message),
            EmbedError::Contract(message) => RetrievalError::Contract(message),
        }
    }
}

impl From<ResourceError> for RetrievalError {
    fn from(err: ResourceError) -> Self {
        RetrievalError::ResourceUnavailable(err.to_string())
    }
}

/// Errors that end a turn abnormally. Everything operational is reported
/// through `TurnStatus` instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("contract violation: {0}")]
    Contract(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("no text could be extracted from the document")]
    NoText,

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NoText => ApiError::BadRequest(err.to_string()),
            IngestError::Store(StoreError::Contract(_)) | IngestError::Embed(EmbedError::Contract(_)) => {
                ApiError::InternalError(err.to_string())
            }
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}
