//! HTTP-facing error type: wraps a [`workforge_workflow::ErrorCode`] with
//! the message a caller should see, and renders it as the `{error, status}`
//! body named for every failing endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use workforge_runtime::ServiceError;
use workforge_workflow::ErrorCode;

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn status(&self) -> StatusCode {
        match self.code {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::RunNotFound | ErrorCode::WorkflowNotFound => StatusCode::NOT_FOUND,
            ErrorCode::WorkflowDisabled
            | ErrorCode::NoPublishedVersion
            | ErrorCode::RestrictedBlockType
            | ErrorCode::GotoTargetNotFound => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        Self::new(code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": self.message,
            "status": status.as_u16(),
            "code": self.code,
        }));
        (status, body).into_response()
    }
}
