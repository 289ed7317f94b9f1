use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::api::views;
use crate::services::interaction::TransitionError;
use crate::services::table::TableError;
use crate::services::warehouse::WarehouseError;
use crate::utils::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid CSV: {0}")]
    InvalidCsv(#[from] TableError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Invalid interaction: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err.code {
            "FILE_TOO_LARGE" => AppError::PayloadTooLarge(err.message),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl AppError {
    /// Status code and the message that is safe to show to the caller.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            AppError::InvalidCsv(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            AppError::Warehouse(e @ WarehouseError::MissingConfig(_)) => {
                tracing::error!("Warehouse configuration error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Warehouse(e) => {
                tracing::error!("Warehouse error: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::InvalidTransition(e) => (StatusCode::CONFLICT, e.to_string()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// [`AppError`] rendered as an HTML page for the browser form.
#[derive(Debug)]
pub struct PageError(pub AppError);

impl<E> From<E> for PageError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        PageError(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let (status, message) = self.0.status_and_message();
        (status, Html(views::error_page(status, &message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_mapping() {
        let err: AppError = ValidationError {
            code: "FILE_TOO_LARGE",
            message: "too big".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let err: AppError = ValidationError {
            code: "INVALID_FILENAME",
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::InvalidCsv(TableError::Empty), StatusCode::UNPROCESSABLE_ENTITY),
            (
                AppError::Warehouse(WarehouseError::MissingConfig("SNOWFLAKE_PASSWORD")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Warehouse(WarehouseError::Connect("timeout".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let (_, message) = AppError::Internal("db password leaked".into()).status_and_message();
        assert_eq!(message, "Internal Server Error");
    }
}
