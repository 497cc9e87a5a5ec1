use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use common_identity::{HashError, ResolveError, SaltError};
use common_kv::KvError;
use common_queue::QueueError;
use common_store::StoreError;
use common_types::UserId;

#[derive(Debug, PartialEq, Eq, Serialize)]
pub enum ApiResponseCode {
    Ok = 1,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: ApiResponseCode,
    /// The resolved user id, so SDKs can remember it client-side. Absent on
    /// accepted-but-dropped requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        ApiResponse {
            status: ApiResponseCode::Ok,
            user_id: None,
        }
    }

    pub fn for_user(user: UserId) -> Self {
        ApiResponse {
            status: ApiResponseCode::Ok,
            user_id: Some(user.to_string()),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("event submitted with an empty event name")]
    MissingEventName,
    #[error("page view event submitted without a url")]
    MissingUrl,
    #[error("outbound link event submitted without a url")]
    MissingLinkUrl,
    #[error("outbound link event submitted without a href")]
    MissingHref,
    #[error("identify call submitted without an identifier")]
    MissingIdentifier,

    #[error("project token is not valid")]
    InvalidToken,
    #[error("identifier {0:?} is not identified")]
    UnknownIdentifier(String),

    #[error("identification already in progress for this identifier")]
    IdentifyInProgress,

    #[error("failed to encode job payload: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("coordination store error: {0}")]
    Kv(#[from] KvError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("salt error: {0}")]
    Salt(#[from] SaltError),
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownIdentifier(id) => ApiError::UnknownIdentifier(id),
            ResolveError::Store(e) => ApiError::Store(e),
            ResolveError::Salt(e) => ApiError::Salt(e),
            ResolveError::Kv(e) => ApiError::Kv(e),
            ResolveError::Hash(e) => ApiError::Hash(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingEventName
            | ApiError::MissingUrl
            | ApiError::MissingLinkUrl
            | ApiError::MissingHref
            | ApiError::MissingIdentifier => (StatusCode::BAD_REQUEST, self.to_string()),

            ApiError::InvalidToken | ApiError::UnknownIdentifier(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }

            ApiError::IdentifyInProgress => (StatusCode::CONFLICT, self.to_string()),

            ApiError::Encoding(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),

            ApiError::Store(_)
            | ApiError::Kv(_)
            | ApiError::Queue(_)
            | ApiError::Salt(_)
            | ApiError::Hash(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        }
        .into_response()
    }
}
