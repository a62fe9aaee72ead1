//! JSON envelopes and the error type every handler returns.
//!
//! Success bodies are `{code: 0, success: true, data}`; failures are
//! `{code, message}` with the HTTP status mirroring the error.

use crate::store::StoreError;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;
use utoipa::ToSchema;

/// Business code for a rejected username/password pair.
pub const CODE_INVALID_CREDENTIALS: i32 = 1001;
pub const INVALID_CREDENTIALS_MESSAGE: &str = "帳號或密碼錯誤";
pub const UNAUTHENTICATED_MESSAGE: &str = "Unauthenticated.";

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub success: bool,
    pub data: T,
}

/// Wrap `data` in the success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        success: true,
        data,
    })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{INVALID_CREDENTIALS_MESSAGE}")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(String),
    #[error("{message}")]
    Validation {
        message: String,
        errors: BTreeMap<String, Vec<String>>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too Many Attempts.")]
    TooManyRequests { limit: u32, retry_after_secs: u64 },
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated(UNAUTHENTICATED_MESSAGE.to_string())
    }

    /// Single-field validation failure.
    #[must_use]
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), vec![message.clone()]);
        Self::Validation { message, errors }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Business code carried in the body.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidCredentials => CODE_INVALID_CREDENTIALS,
            other => i32::from(other.status().as_u16()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound => Self::NotFound("Record not found".to_string()),
            StoreError::Database(err) => {
                error!("Database error: {err}");
                Self::Internal("Database error".to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let mut headers = HeaderMap::new();

        let body = match self {
            Self::InvalidCredentials => ErrorBody {
                code,
                message: INVALID_CREDENTIALS_MESSAGE.to_string(),
                error: Some(INVALID_CREDENTIALS_MESSAGE.to_string()),
                errors: None,
            },
            Self::Validation { message, errors } => ErrorBody {
                code,
                message,
                error: None,
                errors: Some(errors),
            },
            Self::TooManyRequests {
                limit,
                retry_after_secs,
            } => {
                headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
                headers.insert("Retry-After", HeaderValue::from(retry_after_secs));
                ErrorBody {
                    code,
                    message: "Too Many Attempts.".to_string(),
                    error: None,
                    errors: None,
                }
            }
            Self::Internal(message) => {
                error!("Internal error: {message}");
                ErrorBody {
                    code,
                    message: "Internal Server Error".to_string(),
                    error: None,
                    errors: None,
                }
            }
            Self::Unauthenticated(message)
            | Self::Forbidden(message)
            | Self::NotFound(message)
            | Self::Conflict(message) => ErrorBody {
                code,
                message,
                error: None,
                errors: None,
            },
        };

        (status, headers, Json(body)).into_response()
    }
}
