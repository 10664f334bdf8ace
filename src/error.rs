use std::path::PathBuf;

use thiserror::Error;

/// Every failure a farmbook operation can report
///
/// Client mistakes (`BadRequest`, `CredentialMismatch`, `NotFound`) carry a message that is safe
/// to show. Server-side failures are logged and replaced by a generic message at the HTTP edge.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    CredentialMismatch(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// The record file exists but is not a JSON array of the expected shape.
    #[error("record file {path:?} is corrupt: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    /// True for errors caused by the caller rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::BadRequest(_)
                | AppError::CredentialMismatch(_)
                | AppError::Unauthorized(_)
                | AppError::Forbidden(_)
                | AppError::NotFound(_)
        )
    }
}

#[cfg(feature = "web")]
mod web {
    use axum::{
        Json,
        extract::rejection::{JsonRejection, PathRejection, QueryRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    use super::AppError;

    impl AppError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                AppError::BadRequest(_) | AppError::CredentialMismatch(_) => {
                    StatusCode::BAD_REQUEST
                }
                AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                AppError::Forbidden(_) => StatusCode::FORBIDDEN,
                AppError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl From<JsonRejection> for AppError {
        fn from(rejection: JsonRejection) -> Self {
            AppError::BadRequest(rejection.body_text())
        }
    }

    impl From<PathRejection> for AppError {
        fn from(rejection: PathRejection) -> Self {
            AppError::BadRequest(rejection.body_text())
        }
    }

    impl From<QueryRejection> for AppError {
        fn from(rejection: QueryRejection) -> Self {
            AppError::BadRequest(rejection.body_text())
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            let message = if self.is_client_error() {
                self.to_string()
            } else {
                log::error!("{}", self);
                match self {
                    AppError::CorruptStore { .. } => {
                        "Stored records could not be read; contact an administrator".to_string()
                    }
                    _ => "Internal server error".to_string(),
                }
            };

            let body = Json(json!({
                "success": false,
                "message": message,
            }));

            (status, body).into_response()
        }
    }
}
