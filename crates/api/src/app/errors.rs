use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::ServiceError;

pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::PermissionDenied => StatusCode::FORBIDDEN,
        ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        (
            status,
            axum::Json(json!({
                "error": self.code(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::invalid_argument(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::invalid_argument(rejection.body_text())
    }
}
