//! API error types with HTTP response mapping.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
///
/// Internal causes are logged when the response is built and never sent to
/// the client.
#[derive(Debug)]
pub enum ApiError {
    /// A read failed. Answered with a plain-text body.
    ReadFailed { message: &'static str, cause: String },
    /// A create, update or delete failed.
    WriteFailed { message: &'static str, cause: String },
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
}

impl ApiError {
    pub fn read(message: &'static str, cause: impl Display) -> Self {
        ApiError::ReadFailed {
            message,
            cause: cause.to_string(),
        }
    }

    pub fn write(message: &'static str, cause: impl Display) -> Self {
        ApiError::WriteFailed {
            message,
            cause: cause.to_string(),
        }
    }
}

/// JSON body shared by every write endpoint.
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::ReadFailed { message, cause } => {
                tracing::error!(error = %cause, "{message}");
                return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
            }
            ApiError::WriteFailed { message, cause } => {
                tracing::error!(error = %cause, "{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => {
                tracing::debug!(error = %msg, "rejected request");
                (StatusCode::BAD_REQUEST, msg)
            }
        };

        let body = Outcome {
            success: false,
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn read_failure_is_plain_text_without_cause() {
        let response = ApiError::read("Error retrieving list", "connection refused").into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Error retrieving list");
    }

    #[tokio::test]
    async fn write_failure_hides_cause() {
        let response =
            ApiError::write("Error updating invoice and related data", "unique violation")
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Error updating invoice and related data");
    }

    #[tokio::test]
    async fn bad_request_carries_message() {
        let response = ApiError::BadRequest("missing field `city`".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["message"], "missing field `city`");
    }
}
