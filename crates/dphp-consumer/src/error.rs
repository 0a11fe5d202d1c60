use dphp_auth::AuthError;
use dphp_glue::GlueError;
use dphp_state::{LockError, StateError};
use dphp_store::StoreError;
use dphp_types::TypesError;
use thiserror::Error;

pub type ConsumerResult<T> = Result<T, ConsumerError>;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("message has no {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {header} header {value:?}: {reason}")]
    InvalidHeader {
        header: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Glue(#[from] GlueError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What to tell the stream about a message that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Drop it; retrying cannot help.
    Ack,
    /// Redeliver it.
    Nak,
    /// Never redeliver it.
    Term(String),
}

impl ConsumerError {
    pub(crate) fn invalid_header(
        header: &'static str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        ConsumerError::InvalidHeader {
            header,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ConsumerError::MissingHeader(_)
            | ConsumerError::InvalidHeader { .. }
            | ConsumerError::Types(_)
            | ConsumerError::Serialization(_) => Disposition::Term(self.to_string()),
            ConsumerError::Lock(_) | ConsumerError::Store(_) => Disposition::Nak,
            ConsumerError::State(e) => state_disposition(e),
            ConsumerError::Glue(e) => glue_disposition(e),
            ConsumerError::Auth(e) => match e {
                e if e.is_rejection() => Disposition::Ack,
                AuthError::Store(_) | AuthError::Io(_) | AuthError::PermissionsUnavailable(_) => {
                    Disposition::Nak
                }
                AuthError::State(e) => state_disposition(e),
                AuthError::Glue(e) => glue_disposition(e),
                other => Disposition::Term(other.to_string()),
            },
        }
    }
}

fn state_disposition(e: &StateError) -> Disposition {
    match e {
        StateError::Types(_) | StateError::NotWatchable { .. } => Disposition::Term(e.to_string()),
        StateError::ConcurrencyConflict { .. }
        | StateError::Io(_)
        | StateError::Store(_)
        | StateError::Lock(_) => Disposition::Nak,
    }
}

fn glue_disposition(e: &GlueError) -> Disposition {
    match e {
        GlueError::ExecutorFailure { reason, .. } => Disposition::Term(reason.clone()),
        GlueError::MalformedOutput { .. } | GlueError::Types(_) | GlueError::Serialization(_) => {
            Disposition::Term(e.to_string())
        }
        GlueError::State(e) => state_disposition(e),
        GlueError::Spawn { .. } | GlueError::Io(_) => Disposition::Nak,
    }
}
