use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Error reply carrying a sanitised detail string. The full internal error is
/// logged server-side; the response only echoes the stage message plus the
/// job id, never payload contents.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// Log `detail` under `prefix` and answer with `[job_id] detail`.
    pub fn job(prefix: &str, job_id: &str, status: StatusCode, detail: impl std::fmt::Display) -> Self {
        error!("{prefix} {detail}");
        Self::new(status, format!("[{job_id}] {detail}"))
    }

    /// Log the internal error under `prefix`; the response stays generic.
    pub fn internal(prefix: &str, job_id: &str, err: impl std::fmt::Display) -> Self {
        error!("{prefix} {err}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("[{job_id}] internal server error"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
