use salvo::prelude::*;
use salvo::writing::Scribe;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::access::Denied;
use crate::auth::AuthError;
use crate::db::DatabaseError;
use crate::media::MediaError;

/// Errors rendered as `{"error": message}` with a matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Scribe for ApiError {
    fn render(self, res: &mut Response) {
        res.status_code(self.status());
        res.render(Json(json!({ "error": self.to_string() })));
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(message) => ApiError::Conflict(message),
            DatabaseError::NotFound(message) => ApiError::NotFound(message),
            DatabaseError::Invalid(message) => ApiError::BadRequest(message),
            other => {
                error!("database error: {}", other);
                ApiError::Internal("internal server error".to_string())
            }
        }
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        ApiError::Forbidden(denied.0.to_string())
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            MediaError::Empty | MediaError::TooMany { .. } | MediaError::MimeNotAllowed(_) => {
                ApiError::BadRequest(err.to_string())
            }
            MediaError::Io(io) => {
                error!("upload storage error: {}", io);
                ApiError::Internal("failed to store upload".to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ApiError::Unauthorized(err.to_string()),
            other => {
                error!("auth error: {}", other);
                ApiError::Internal("internal server error".to_string())
            }
        }
    }
}
