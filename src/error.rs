use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::ai::AiError;
use crate::auth::AuthError;
use crate::models::ApiResponse;
use crate::store::StoreError;
use crate::uploads::UploadError;

/// Errors surfaced by HTTP handlers, rendered as `{"success": false, "error": ...}`
#[derive(Error, Debug)]
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
    BadGateway(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Internal(detail) => {
                log::error!("Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(message))
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::Database(e) => ApiError::Internal(format!("database: {}", e)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::SessionRevoked => {
                ApiError::Unauthorized(e.to_string())
            }
            AuthError::Google(_) => ApiError::Unauthorized(e.to_string()),
            AuthError::GoogleUnavailable(_) => ApiError::BadGateway(e.to_string()),
            AuthError::Validation(msg) => ApiError::BadRequest(msg),
            AuthError::Conflict(msg) => ApiError::Conflict(msg),
            AuthError::Hash(_) | AuthError::Jwt(_) => ApiError::Internal(e.to_string()),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::UnsupportedType(_) | UploadError::Empty => ApiError::BadRequest(e.to_string()),
            UploadError::TooLarge(_) => ApiError::PayloadTooLarge(e.to_string()),
            UploadError::Io(e) => ApiError::Internal(format!("upload io: {}", e)),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::NotConfigured => ApiError::Unavailable(e.to_string()),
            AiError::Upstream(_) | AiError::EmptyReply => ApiError::BadGateway(e.to_string()),
        }
    }
}
