use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::kv::{KeyValue, KvConfig};
use crate::object::{ObjectStore, ObjectStoreConfig};
use crate::stream::{MessageStream, Publisher, StreamConfig};

/// Connection to the external store: buckets, object stores and streams.
///
/// Opening a bucket, object store or stream creates it if it does not
/// exist and is otherwise idempotent.
#[async_trait]
pub trait Broker: Publisher {
    async fn key_value(&self, config: KvConfig) -> StoreResult<Arc<dyn KeyValue>>;

    async fn object_store(&self, config: ObjectStoreConfig) -> StoreResult<Arc<dyn ObjectStore>>;

    async fn stream(&self, config: StreamConfig) -> StoreResult<Arc<dyn MessageStream>>;
}
