use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::access::DenyReason;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("too many requests")]
    TooManyRequests,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Field-level validation error naming the offending field.
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: None,
            message: message.into(),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            // Uniqueness races surface through the storage constraint; they
            // are reported exactly like the application-level pre-check.
            RepoError::Conflict(field) => ApiError::Validation {
                field: Some(field),
                message: format!("{field} already registered"),
            },
            RepoError::UnknownReference(field) => ApiError::Validation {
                field: Some(field),
                message: format!("unknown {field}"),
            },
            RepoError::Internal(detail) => {
                // Do not leak storage internals to the caller.
                log::error!("storage error: {detail}");
                ApiError::Internal
            }
        }
    }
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => ApiError::Unauthorized,
            DenyReason::AdminOnly | DenyReason::OwnerOnly => ApiError::Forbidden,
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let field = match self {
            ApiError::Validation { field, .. } => *field,
            _ => None,
        };
        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
            field,
        })
    }
}
