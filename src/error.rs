use std::time::Duration;
use thiserror::Error;

/// Failures that stop a run before any task is dispatched
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task generation failed: {0}")]
    Generation(String),
}

/// Failures that end a single task; the run continues with the others
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to open browser session: {0}")]
    SessionOpen(String),

    #[error("submit button could not be located")]
    SubmitUnresolved,

    #[error("task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("browser driver error: {0}")]
    Driver(String),
}

/// Failures while filling one field; always absorbed by the worker
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field '{0}' is not mapped or not present on the page")]
    Absent(String),

    #[error("field '{key}' has an unsupported element kind ({tag})")]
    Unsupported { key: String, tag: String },

    #[error("no option of '{key}' matches '{value}'")]
    NoMatchingOption { key: String, value: String },

    #[error("driver error on field '{key}': {reason}")]
    Driver { key: String, reason: String },
}

/// Failures of a single inference call; the next credential is tried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("no credentials supplied")]
    NoCredentials,

    #[error("inference request failed: {0}")]
    Request(String),

    #[error("inference returned no usable text")]
    EmptyResponse,

    #[error("inference reply is malformed: {0}")]
    MalformedResponse(String),
}
