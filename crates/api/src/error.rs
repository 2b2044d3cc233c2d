use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use illustrify_comfyui::WatchError;
use illustrify_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and [`WatchError`] for executor
/// failures, and adds HTTP-specific variants. Implements [`IntoResponse`]
/// to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `illustrify_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The job could not be submitted, watched or retrieved.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The executor ran the job but reported a failure.
    #[error("Generation failed: {0}")]
    ExecutionFailed(String),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Malformed or mistyped JSON bodies are client errors, reported in the
/// same envelope as every other failure.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} '{id}' not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Executor errors ---
            AppError::Watch(err) => classify_watch_error(err),
            AppError::ExecutionFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                "EXECUTION_FAILED",
                format!("Generation failed: {msg}"),
            ),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a watcher error into an HTTP status, error code, and message.
///
/// Executor response bodies are logged, not returned.
fn classify_watch_error(err: &WatchError) -> (StatusCode, &'static str, String) {
    match err {
        WatchError::Submission { status, body } => {
            tracing::warn!(status, body = %body, "ComfyUI rejected the workflow");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "SUBMISSION_REJECTED",
                format!("ComfyUI rejected the workflow (status {status})"),
            )
        }
        WatchError::Connection(msg) => {
            tracing::error!(error = %msg, "ComfyUI unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "COMFYUI_UNAVAILABLE",
                "ComfyUI is not reachable".to_string(),
            )
        }
        WatchError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "GENERATION_TIMEOUT",
            err.to_string(),
        ),
        WatchError::NotFound(name) => (
            StatusCode::NOT_FOUND,
            "OUTPUT_NOT_FOUND",
            format!("Output '{name}' not found on ComfyUI"),
        ),
        WatchError::Transport(msg) => {
            tracing::error!(error = %msg, "ComfyUI transport error");
            (
                StatusCode::BAD_GATEWAY,
                "COMFYUI_ERROR",
                "Communication with ComfyUI failed".to_string(),
            )
        }
    }
}
