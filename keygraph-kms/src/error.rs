//! KMS error types and their HTTP rendering.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for KMS operations.
pub type KmsResult<T> = Result<T, KmsError>;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// Admin credentials missing or wrong.
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("could not decrypt the given value")]
    Decryption,

    #[error("error fetching verification keys: {0}")]
    KeyFetch(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KmsError {
    pub fn status(&self) -> StatusCode {
        match self {
            KmsError::BadRequest(_) | KmsError::Decryption => StatusCode::BAD_REQUEST,
            KmsError::Unauthorized => StatusCode::UNAUTHORIZED,
            KmsError::Forbidden(_) => StatusCode::FORBIDDEN,
            KmsError::KeyFetch(_) | KmsError::Config(_) | KmsError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for KmsError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, KmsError::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"kms\""),
            );
        }
        response
    }
}
