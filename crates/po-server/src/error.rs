// HTTP error mapping (spec §7 "never surface raw stack traces").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use po_core::error::EngineError;
use serde_json::json;

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::PromptObjectNotFound(_) | EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Config(_) | EngineError::Resolution(_) => StatusCode::BAD_REQUEST,
            EngineError::AlreadyResolved(_) => StatusCode::CONFLICT,
            EngineError::HumanCancelled(_) | EngineError::Cancelled => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.user_message() }))).into_response()
    }
}
