//! Durable streams, pull consumers and deliveries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dphp_types::Headers;

use crate::error::StoreResult;
use crate::kv::StorageKind;

/// A message to publish onto a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Headers,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: Headers::new(),
            payload: payload.into(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    Limits,
    Interest,
    /// Messages are removed once acknowledged or terminated.
    #[default]
    WorkQueue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub storage: StorageKind,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: RetentionPolicy::WorkQueue,
            storage: StorageKind::File,
        }
    }
}

/// Durable pull consumer configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub durable_name: String,
    pub filter_subjects: Vec<String>,
    /// How long a delivery may stay unacknowledged before redelivery.
    pub ack_wait: Duration,
    /// Deliveries after which a message is dropped; `None` is unlimited.
    pub max_deliver: Option<u32>,
}

impl ConsumerConfig {
    pub fn new(durable_name: impl Into<String>, filter_subjects: Vec<String>) -> Self {
        Self {
            durable_name: durable_name.into(),
            filter_subjects,
            ack_wait: Duration::from_secs(30),
            max_deliver: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub stream: String,
    pub consumer: String,
    pub stream_sequence: u64,
    /// Delivery attempt, starting at 1.
    pub delivered: u32,
    pub published: DateTime<Utc>,
}

/// Acknowledgement side of a consumer.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, sequence: u64) -> StoreResult<()>;

    async fn nak(&self, sequence: u64, delay: Option<Duration>) -> StoreResult<()>;

    async fn term(&self, sequence: u64, reason: &str) -> StoreResult<()>;

    /// Restart the ack-wait timer of an unsettled delivery.
    async fn in_progress(&self, sequence: u64) -> StoreResult<()>;
}

/// A message handed to a consumer.
pub struct Delivery {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Headers,
    pub payload: Bytes,
    pub info: DeliveryInfo,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(message: OutboundMessage, info: DeliveryInfo, acker: Arc<dyn Acker>) -> Self {
        Self {
            subject: message.subject,
            reply: message.reply,
            headers: message.headers,
            payload: message.payload,
            info,
            acker,
        }
    }

    pub async fn ack(&self) -> StoreResult<()> {
        self.acker.ack(self.info.stream_sequence).await
    }

    /// Redeliver once the consumer's default backoff allows.
    pub async fn nak(&self) -> StoreResult<()> {
        self.acker.nak(self.info.stream_sequence, None).await
    }

    pub async fn nak_with_delay(&self, delay: Duration) -> StoreResult<()> {
        self.acker.nak(self.info.stream_sequence, Some(delay)).await
    }

    /// Hold off redelivery for another ack wait while still working on it.
    pub async fn in_progress(&self) -> StoreResult<()> {
        self.acker.in_progress(self.info.stream_sequence).await
    }

    /// Never redeliver this message.
    pub async fn term_with_reason(&self, reason: &str) -> StoreResult<()> {
        self.acker.term(self.info.stream_sequence, reason).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("headers", &self.headers)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish and wait for the stream to store the message.
    async fn publish(&self, message: OutboundMessage) -> StoreResult<u64>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    /// Wait for the next available delivery.
    async fn next(&self) -> StoreResult<Delivery>;
}

#[async_trait]
pub trait MessageStream: Publisher {
    fn name(&self) -> &str;

    /// Create the durable consumer, or bind to it if it already exists.
    async fn consumer(&self, config: ConsumerConfig) -> StoreResult<Arc<dyn Consumer>>;
}

/// Match `subject` against a filter using `*` (one token) and `>` (the
/// remaining tokens) wildcards.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
