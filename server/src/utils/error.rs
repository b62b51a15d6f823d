use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::identity::IdentityError;
use crate::inscriptions::InscriptionError;
use crate::ledger::LedgerError;
use crate::payments::PaymentError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("No capacity: {0}")]
    NoCapacity(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Not bookable: {0}")]
    NotBookable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error")]
    StoreError(#[from] StoreError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoCapacity(_) | AppError::Duplicate(_) | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::NotBookable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NoCapacity(_) => "NO_CAPACITY",
            AppError::Duplicate(_) => "DUPLICATE",
            AppError::NotBookable(_) => "NOT_BOOKABLE",
            AppError::Conflict(_) => "CONFLICT",
            AppError::StoreError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::StoreError(e) => error!(error = ?e, "Store error"),
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(code = self.code(), message = %msg, "Application error");
            }
            other => warn!(code = other.code(), message = %other, "Request rejected"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::NoCapacity(msg)
            | AppError::Duplicate(msg)
            | AppError::NotBookable(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalServiceError(msg) => msg.clone(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
            AppError::StoreError(_) => "A database error occurred".to_string(),
        };

        error_response(code, public_message, None, status)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => AppError::NotFound(err.to_string()),
            LedgerError::NoCapacity(_) => AppError::NoCapacity(err.to_string()),
            LedgerError::NotBookable { .. } => AppError::NotBookable(err.to_string()),
            LedgerError::InvalidStatusChange { .. } => AppError::Conflict(err.to_string()),
            LedgerError::DepartureInPast | LedgerError::Invalid(_) => {
                AppError::ValidationError(err.to_string())
            }
            LedgerError::Integrity { .. } => AppError::InternalServerError(err.to_string()),
            LedgerError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnknownCustomer(_) => AppError::AuthError(err.to_string()),
            IdentityError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<InscriptionError> for AppError {
    fn from(err: InscriptionError) -> Self {
        match err {
            InscriptionError::NotFound(_) => AppError::NotFound(err.to_string()),
            InscriptionError::Duplicate => AppError::Duplicate(err.to_string()),
            InscriptionError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            InscriptionError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            InscriptionError::Ledger(e) => e.into(),
            InscriptionError::Identity(e) => e.into(),
            InscriptionError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(msg) => AppError::ValidationError(msg),
            PaymentError::NotFound(_) => AppError::NotFound(err.to_string()),
            PaymentError::Forbidden => AppError::Forbidden(err.to_string()),
            PaymentError::NotPayable(_) | PaymentError::MethodNotAccepted(_) => {
                AppError::NotBookable(err.to_string())
            }
            PaymentError::InProgress(_) => AppError::Conflict(err.to_string()),
            PaymentError::Gateway(e) => {
                AppError::ExternalServiceError(format!("payment gateway unavailable: {e}"))
            }
            PaymentError::Inscription(e) => e.into(),
            PaymentError::Ledger(e) => e.into(),
            PaymentError::Identity(e) => e.into(),
            PaymentError::Store(e) => AppError::StoreError(e),
        }
    }
}
