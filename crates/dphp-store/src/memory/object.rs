use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dphp_types::Headers;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::object::{digest, ObjectInfo, ObjectLink, ObjectMeta, ObjectStore, ObjectStoreConfig};

struct StoredObject {
    info: ObjectInfo,
    data: Bytes,
}

/// In-memory object store. Links may only point into the same bucket.
pub struct MemoryObjectStore {
    config: ObjectStoreConfig,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub(crate) fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            objects: RwLock::new(HashMap::new()),
        }
    }

    fn nuid() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn put(&self, meta: ObjectMeta, data: Bytes) -> StoreResult<ObjectInfo> {
        let info = ObjectInfo {
            bucket: self.config.bucket.clone(),
            name: meta.name.clone(),
            description: meta.description,
            headers: meta.headers,
            nuid: Self::nuid(),
            size: data.len() as u64,
            modified: Utc::now(),
            digest: digest(&data),
            link: None,
        };
        let mut objects = self.objects.write().await;
        objects.insert(
            meta.name,
            StoredObject {
                info: info.clone(),
                data,
            },
        );
        Ok(info)
    }

    async fn get(&self, name: &str) -> StoreResult<Option<Bytes>> {
        let objects = self.objects.read().await;
        let Some(object) = objects.get(name) else {
            return Ok(None);
        };
        match &object.info.link {
            None => Ok(Some(object.data.clone())),
            Some(link) if link.bucket == self.config.bucket => Ok(objects
                .get(&link.name)
                .filter(|target| !target.info.is_link())
                .map(|target| target.data.clone())),
            Some(link) => Err(StoreError::BucketNotFound(link.bucket.clone())),
        }
    }

    async fn info(&self, name: &str) -> StoreResult<Option<ObjectInfo>> {
        let objects = self.objects.read().await;
        Ok(objects.get(name).map(|object| object.info.clone()))
    }

    async fn add_link(
        &self,
        name: &str,
        target: &ObjectInfo,
        headers: Headers,
    ) -> StoreResult<ObjectInfo> {
        if target.is_link() {
            return Err(StoreError::InvalidConfig(format!(
                "{} is a link; links must point at objects",
                target.name
            )));
        }
        if target.bucket != self.config.bucket {
            return Err(StoreError::BucketNotFound(target.bucket.clone()));
        }

        let mut objects = self.objects.write().await;
        if !objects.contains_key(&target.name) {
            return Err(StoreError::NotFound(format!(
                "{}/{}",
                self.config.bucket, target.name
            )));
        }
        if let Some(existing) = objects.get(name) {
            if !existing.info.is_link() {
                return Err(StoreError::KeyExists {
                    bucket: self.config.bucket.clone(),
                    key: name.to_string(),
                });
            }
        }

        let info = ObjectInfo {
            bucket: self.config.bucket.clone(),
            name: name.to_string(),
            description: None,
            headers,
            nuid: Self::nuid(),
            size: 0,
            modified: Utc::now(),
            digest: String::new(),
            link: Some(ObjectLink {
                bucket: target.bucket.clone(),
                name: target.name.clone(),
            }),
        };
        objects.insert(
            name.to_string(),
            StoredObject {
                info: info.clone(),
                data: Bytes::new(),
            },
        );
        Ok(info)
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        match objects.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!(
                "{}/{}",
                self.config.bucket, name
            ))),
        }
    }

    async fn list(&self) -> StoreResult<Vec<ObjectInfo>> {
        let objects = self.objects.read().await;
        let mut infos: Vec<ObjectInfo> = objects.values().map(|o| o.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new(ObjectStoreConfig::new("entity"))
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = store();
        let info = store
            .put(ObjectMeta::new("a"), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert!(info.digest.starts_with("BLAKE3-"));
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn revisions_get_fresh_nuids() {
        let store = store();
        let first = store.put(ObjectMeta::new("a"), Bytes::new()).await.unwrap();
        let second = store.put(ObjectMeta::new("a"), Bytes::new()).await.unwrap();
        assert_ne!(first.nuid, second.nuid);
    }

    #[tokio::test]
    async fn links_follow_to_target() {
        let store = store();
        let v1 = store
            .put(ObjectMeta::new("s/1"), Bytes::from_static(b"one"))
            .await
            .unwrap();
        let mut headers = Headers::new();
        headers.insert("State-Id", "entity:a:b");
        let link = store.add_link("s", &v1, headers).await.unwrap();
        assert!(link.is_link());
        assert_eq!(store.get("s").await.unwrap(), Some(Bytes::from_static(b"one")));

        let v2 = store
            .put(ObjectMeta::new("s/2"), Bytes::from_static(b"two"))
            .await
            .unwrap();
        store.add_link("s", &v2, Headers::new()).await.unwrap();
        assert_eq!(store.get("s").await.unwrap(), Some(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn link_cannot_replace_object() {
        let store = store();
        let target = store.put(ObjectMeta::new("t"), Bytes::new()).await.unwrap();
        store.put(ObjectMeta::new("s"), Bytes::new()).await.unwrap();
        let err = store.add_link("s", &target, Headers::new()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn dangling_link_reads_as_missing() {
        let store = store();
        let target = store.put(ObjectMeta::new("t"), Bytes::new()).await.unwrap();
        store.add_link("s", &target, Headers::new()).await.unwrap();
        store.delete("t").await.unwrap();
        assert_eq!(store.get("s").await.unwrap(), None);
        assert!(store.delete("t").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let store = store();
        assert!(!store.get_file("a", &path).await.unwrap());
        assert!(!path.exists());

        tokio::fs::write(&path, b"data").await.unwrap();
        store.put_file(ObjectMeta::new("a"), &path).await.unwrap();
        let out = dir.path().join("out");
        assert!(store.get_file("a", &out).await.unwrap());
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"data");
    }
}
