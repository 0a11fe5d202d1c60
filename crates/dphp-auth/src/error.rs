use dphp_glue::GlueError;
use dphp_state::StateError;
use dphp_store::StoreError;
use dphp_types::TypesError;
use thiserror::Error;

use crate::operation::Operation;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("operation {operation} not allowed by current context")]
    NotAuthorized { operation: Operation },

    #[error("user cannot create resource {id}")]
    NotAuthorizedToCreate { id: String },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("no user is present in the current context")]
    UnknownUser,

    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    #[error("invalid permissions: {0}")]
    InvalidPermissions(String),

    #[error("permissions unavailable: {0}")]
    PermissionsUnavailable(String),

    #[error("token error: {0}")]
    Token(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Glue(#[from] GlueError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub(crate) fn not_authorized(operation: Operation) -> Self {
        AuthError::NotAuthorized { operation }
    }

    /// Rejections that will not change on redelivery.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthorized { .. }
                | AuthError::NotAuthorizedToCreate { .. }
                | AuthError::ResourceNotFound(_)
                | AuthError::UnknownUser
                | AuthError::UnknownOperation(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AuthError::Token(e.to_string())
    }
}
