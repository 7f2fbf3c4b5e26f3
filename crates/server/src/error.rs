use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use services::services::{
    auth::AuthError, catalog_sync::CatalogSyncError, exchange_rate::ExchangeRateError,
};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    CatalogSync(#[from] CatalogSyncError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    ExchangeRate(#[from] ExchangeRateError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("missing or invalid access token")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CatalogSync(CatalogSyncError::AlreadyRunning) => StatusCode::CONFLICT,
            ApiError::CatalogSync(CatalogSyncError::Erp(_))
            | ApiError::CatalogSync(CatalogSyncError::ExchangeRate(_))
            | ApiError::ExchangeRate(_) => StatusCode::BAD_GATEWAY,
            ApiError::CatalogSync(CatalogSyncError::Database(_)) | ApiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Auth(AuthError::InvalidCredentials) | ApiError::Auth(AuthError::Token(_)) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            error!(error = %self, "Request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, ResponseJson(ApiResponse::<()>::error(&message))).into_response()
    }
}
