//! Versioned key-value buckets.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Where a bucket keeps its data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

/// Configuration for a key-value bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvConfig {
    pub bucket: String,
    pub description: String,
    /// Maximum age of an entry; `None` keeps entries forever.
    pub ttl: Option<Duration>,
    pub compression: bool,
    pub storage: StorageKind,
    /// Number of historical revisions kept per key.
    pub history: u8,
}

impl KvConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            description: String::new(),
            ttl: None,
            compression: false,
            storage: StorageKind::File,
            history: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvOperation {
    Put,
    Delete,
    Purge,
}

impl fmt::Display for KvOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvOperation::Put => f.write_str("PUT"),
            KvOperation::Delete => f.write_str("DEL"),
            KvOperation::Purge => f.write_str("PURGE"),
        }
    }
}

/// A single revision of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub bucket: String,
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
    pub created: DateTime<Utc>,
    pub operation: KvOperation,
}

impl KvEntry {
    pub fn is_deleted(&self) -> bool {
        !matches!(self.operation, KvOperation::Put)
    }
}

/// Stream of updates to one key, starting at a requested revision.
pub struct KvWatcher {
    inner: BoxStream<'static, KvEntry>,
}

impl KvWatcher {
    pub fn new(inner: BoxStream<'static, KvEntry>) -> Self {
        Self { inner }
    }

    /// Next update, or `None` once the bucket goes away.
    pub async fn next(&mut self) -> Option<KvEntry> {
        self.inner.next().await
    }
}

impl fmt::Debug for KvWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvWatcher").finish_non_exhaustive()
    }
}

/// A versioned key-value bucket.
///
/// Revisions are per bucket and strictly increasing. `get` hides deleted
/// and expired keys.
#[async_trait]
pub trait KeyValue: Send + Sync {
    fn bucket(&self) -> &str;

    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>>;

    /// Write `value` only if `key` is absent (or its last operation was a delete).
    async fn create(&self, key: &str, value: Bytes) -> StoreResult<u64>;

    /// Write `value` only if the current revision of `key` is `expected_revision`.
    async fn update(&self, key: &str, value: Bytes, expected_revision: u64) -> StoreResult<u64>;

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<u64>;

    /// Leave a delete marker for `key`. Watchers observe it.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remove `key` and its history.
    async fn purge(&self, key: &str) -> StoreResult<()>;

    /// Watch `key`, delivering every revision at or after `from_revision`.
    async fn watch(&self, key: &str, from_revision: u64) -> StoreResult<KvWatcher>;

    /// Keys with a live value.
    async fn keys(&self) -> StoreResult<Vec<String>>;
}
