use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failure of a single sandboxed execution. Guest faults are turned into
/// these values at the executor boundary and never unwind further.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("time limit exceeded")]
    Timeout,
    #[error("{0}")]
    RuntimeFault(String),
    #[error("language {0} is not supported")]
    UnsupportedLanguage(String),
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
    #[error("problem {0} not found")]
    ProblemNotFound(String),
    #[error("language {0} is not supported")]
    UnsupportedLanguage(String),
    #[error("sandbox unavailable: {0}")]
    Sandbox(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl From<ExecutionError> for GradeError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::UnsupportedLanguage(name) => GradeError::UnsupportedLanguage(name),
            ExecutionError::SandboxUnavailable(message) => GradeError::Sandbox(message),
            // guest faults belong in the verdict; reaching here is a runner bug
            other => GradeError::Sandbox(other.to_string()),
        }
    }
}

impl GradeError {
    pub fn status(&self) -> StatusCode {
        match self {
            GradeError::InvalidSubmission(_) | GradeError::UnsupportedLanguage(_) => {
                StatusCode::BAD_REQUEST
            }
            GradeError::ProblemNotFound(_) => StatusCode::NOT_FOUND,
            GradeError::Sandbox(_) => StatusCode::SERVICE_UNAVAILABLE,
            GradeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GradeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("submission failed: {}", self);
            "Error submitting solution".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
