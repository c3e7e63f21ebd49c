use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Standard response envelope shared by every route.
#[derive(Serialize, ToSchema, Debug)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T, M> IntoResponse for StdResponse<T, M>
where
    T: Serialize,
    M: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Errors raised by persistence adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("failed to obtain a DB connection: {0}")]
    Pool(String),
    #[error("{0}")]
    Corrupt(String),
}

/// Errors raised by payment provider adapters.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("payment provider unreachable: {0}")]
    Unreachable(String),
    #[error("payment provider rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid caller identity")]
    Unauthorized,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("{0}")]
    ForbiddenResource(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BusinessRule(String),
    #[error(transparent)]
    PaymentProvider(#[from] GatewayError),
    #[error(transparent)]
    Database(#[from] StoreError),
    #[error("partial failure: {0}")]
    PartialFailure(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BusinessRule(_) => StatusCode::CONFLICT,
            AppError::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::PartialFailure(_) | AppError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let body: StdResponse<(), String> = StdResponse {
            data: None,
            message: Some(self.to_string()),
        };

        (status, Json(body)).into_response()
    }
}
