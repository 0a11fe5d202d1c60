//! Daemon errors

use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Consumer(#[from] dphp_consumer::ConsumerError),

    #[error(transparent)]
    State(#[from] dphp_state::StateError),

    #[error(transparent)]
    Auth(#[from] dphp_auth::AuthError),

    #[error(transparent)]
    Types(#[from] dphp_types::TypesError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}
