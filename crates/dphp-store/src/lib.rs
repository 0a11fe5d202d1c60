//! External-store seam for the durable runtime.
//!
//! The runtime talks to its store through three primitives: versioned
//! key-value buckets ([`KeyValue`]), object stores with named links
//! ([`ObjectStore`]) and durable work-queue streams consumed by pull
//! consumers ([`MessageStream`], [`Consumer`]). A [`Broker`] hands them out.
//!
//! [`memory::MemoryBroker`] implements the whole seam in process.

#![deny(unsafe_code)]

pub mod broker;
pub mod error;
pub mod kv;
pub mod memory;
pub mod object;
pub mod stream;

pub use broker::Broker;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValue, KvConfig, KvEntry, KvOperation, KvWatcher, StorageKind};
pub use memory::MemoryBroker;
pub use object::{ObjectInfo, ObjectLink, ObjectMeta, ObjectStore, ObjectStoreConfig};
pub use stream::{
    subject_matches, Acker, Consumer, ConsumerConfig, Delivery, DeliveryInfo, MessageStream,
    OutboundMessage, Publisher, RetentionPolicy, StreamConfig,
};
