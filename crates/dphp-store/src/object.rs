//! Object stores with named links.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dphp_types::Headers;

use crate::error::StoreResult;
use crate::kv::StorageKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub description: String,
    pub storage: StorageKind,
}

impl ObjectStoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            description: String::new(),
            storage: StorageKind::File,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Metadata supplied when storing an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub description: Option<String>,
    pub headers: Headers,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLink {
    pub bucket: String,
    pub name: String,
}

/// Stored metadata of an object or link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub description: Option<String>,
    pub headers: Headers,
    /// Unique id of this revision.
    pub nuid: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// `BLAKE3-<hex>` digest of the content; empty for links.
    pub digest: String,
    pub link: Option<ObjectLink>,
}

impl ObjectInfo {
    pub fn is_link(&self) -> bool {
        self.link.is_some()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Store `data` under `meta.name`, replacing any previous revision.
    async fn put(&self, meta: ObjectMeta, data: Bytes) -> StoreResult<ObjectInfo>;

    /// Content of `name`, following a link if `name` is one.
    async fn get(&self, name: &str) -> StoreResult<Option<Bytes>>;

    async fn info(&self, name: &str) -> StoreResult<Option<ObjectInfo>>;

    /// Point `name` at `target`, replacing whatever `name` was before.
    async fn add_link(
        &self,
        name: &str,
        target: &ObjectInfo,
        headers: Headers,
    ) -> StoreResult<ObjectInfo>;

    async fn delete(&self, name: &str) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<ObjectInfo>>;

    /// Write the content of `name` to `path`. Returns `false`, leaving
    /// `path` untouched, when there is no such object.
    async fn get_file(&self, name: &str, path: &Path) -> StoreResult<bool> {
        match self.get(name).await? {
            Some(data) => {
                tokio::fs::write(path, &data).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Store the content of `path` as `meta.name`.
    async fn put_file(&self, meta: ObjectMeta, path: &Path) -> StoreResult<ObjectInfo> {
        let data = tokio::fs::read(path).await?;
        self.put(meta, Bytes::from(data)).await
    }
}

/// `BLAKE3-<hex>` digest used for object content.
pub fn digest(data: &[u8]) -> String {
    format!("BLAKE3-{}", blake3::hash(data).to_hex())
}
