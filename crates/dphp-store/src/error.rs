use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by key-value buckets, object stores and streams.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key {key:?} already exists in bucket {bucket}")]
    KeyExists { bucket: String, key: String },

    #[error("wrong last revision for {key:?} in bucket {bucket}: expected {expected}, current {current}")]
    WrongRevision {
        bucket: String,
        key: String,
        expected: u64,
        current: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("no stream listens on subject {0}")]
    NoStream(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("store closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for create/update races lost against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::KeyExists { .. } | StoreError::WrongRevision { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::BucketNotFound(_))
    }
}
