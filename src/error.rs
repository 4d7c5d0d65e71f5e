use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::publishing::{AdmitError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Message(String),
}

impl From<AdmitError> for AppError {
    fn from(err: AdmitError) -> Self {
        match err {
            AdmitError::SubmissionNotFound(_) | AdmitError::TeamNotFound(_) => AppError::NotFound,
            AdmitError::TeamMismatch { .. } => AppError::Forbidden,
            AdmitError::AlreadyPublished(_) | AdmitError::Conflict(_) => {
                AppError::Conflict(err.to_string())
            }
            AdmitError::ChargeFailed { reason, .. } => AppError::PaymentRequired(reason),
            AdmitError::BillingUnavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            AdmitError::Store(err) => AppError::Store(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
