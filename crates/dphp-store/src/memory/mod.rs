//! In-process implementation of the store seam.

mod kv;
mod object;
mod stream;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

pub use kv::MemoryKv;
pub use object::MemoryObjectStore;
pub use stream::MemoryStream;

use crate::broker::Broker;
use crate::error::{StoreError, StoreResult};
use crate::kv::{KeyValue, KvConfig};
use crate::object::{ObjectStore, ObjectStoreConfig};
use crate::stream::{MessageStream, OutboundMessage, Publisher, StreamConfig};

/// In-memory broker for development and testing.
///
/// Buckets and streams live as long as the broker. Reopening an existing
/// bucket returns it unchanged.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    kv: Arc<RwLock<HashMap<String, Arc<MemoryKv>>>>,
    objects: Arc<RwLock<HashMap<String, Arc<MemoryObjectStore>>>>,
    streams: Arc<RwLock<HashMap<String, MemoryStream>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the key-value buckets opened so far.
    pub async fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kv.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn memory_stream(&self, name: &str) -> Option<MemoryStream> {
        self.streams.read().await.get(name).cloned()
    }
}

fn validate_bucket(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!("invalid bucket name {name:?}")))
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> StoreResult<u64> {
        let stream = {
            let streams = self.streams.read().await;
            streams
                .values()
                .find(|s| s.listens_on(&message.subject))
                .cloned()
        };
        match stream {
            Some(stream) => stream.publish(message).await,
            None => Err(StoreError::NoStream(message.subject)),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn key_value(&self, config: KvConfig) -> StoreResult<Arc<dyn KeyValue>> {
        validate_bucket(&config.bucket)?;
        let mut buckets = self.kv.write().await;
        let bucket = buckets
            .entry(config.bucket.clone())
            .or_insert_with(|| {
                debug!(bucket = %config.bucket, "Creating key-value bucket");
                Arc::new(MemoryKv::new(config))
            })
            .clone();
        Ok(bucket)
    }

    async fn object_store(&self, config: ObjectStoreConfig) -> StoreResult<Arc<dyn ObjectStore>> {
        validate_bucket(&config.bucket)?;
        let mut stores = self.objects.write().await;
        let store = stores
            .entry(config.bucket.clone())
            .or_insert_with(|| {
                debug!(bucket = %config.bucket, "Creating object store");
                Arc::new(MemoryObjectStore::new(config))
            })
            .clone();
        Ok(store)
    }

    async fn stream(&self, config: StreamConfig) -> StoreResult<Arc<dyn MessageStream>> {
        if config.name.is_empty() || config.subjects.is_empty() {
            return Err(StoreError::InvalidConfig(format!(
                "stream {:?} needs a name and at least one subject",
                config.name
            )));
        }
        let mut streams = self.streams.write().await;
        let stream = streams
            .entry(config.name.clone())
            .or_insert_with(|| {
                debug!(stream = %config.name, "Creating stream");
                MemoryStream::new(config)
            })
            .clone();
        Ok(Arc::new(stream))
    }
}
