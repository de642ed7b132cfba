use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use streamchat_core::CoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Model error: {0}")]
    Model(#[from] CoreError),

    #[error("Server at capacity, try again later")]
    ServiceUnavailable,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                msg.clone(),
            ),
            ApiError::Model(e) if e.is_client_error() => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                e.to_string(),
            ),
            ApiError::Model(e @ CoreError::ResourceExhausted(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "resource_exhausted",
                e.to_string(),
            ),
            ApiError::Model(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "model_error",
                e.to_string(),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "server_error",
                self.to_string(),
            ),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }

    /// OpenAI-style error object, also used as the final frame of a failed stream.
    pub fn body(&self) -> Value {
        let (status, error_type, message) = self.parts();
        json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16()
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
