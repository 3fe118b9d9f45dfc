//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paygo_migration::MigrationError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Migration(err) => match err {
                MigrationError::Parameter(_) => StatusCode::BAD_REQUEST,
                MigrationError::LookupNotFound(_) => StatusCode::NOT_FOUND,
                MigrationError::Backend(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Migration(err) => err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
