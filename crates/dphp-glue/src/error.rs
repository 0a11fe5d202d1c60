use dphp_state::StateError;
use dphp_types::TypesError;
use thiserror::Error;

pub type GlueResult<T> = Result<T, GlueError>;

#[derive(Error, Debug)]
pub enum GlueError {
    /// The executor reported an error status or exited abnormally.
    #[error("executor failed with status {status}: {reason}")]
    ExecutorFailure { status: u16, reason: String },

    #[error("failed to start executor {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("malformed executor output {line:?}: {reason}")]
    MalformedOutput { line: String, reason: String },

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GlueError {
    pub fn executor_failure(status: u16, reason: impl Into<String>) -> Self {
        GlueError::ExecutorFailure {
            status,
            reason: reason.into(),
        }
    }
}
