use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::stream::{
    subject_matches, Acker, Consumer, ConsumerConfig, Delivery, DeliveryInfo, MessageStream,
    OutboundMessage, Publisher, RetentionPolicy, StreamConfig,
};

#[derive(Clone)]
struct StoredMessage {
    message: OutboundMessage,
    published: DateTime<Utc>,
}

#[derive(Default)]
struct StreamState {
    last_sequence: u64,
    messages: BTreeMap<u64, StoredMessage>,
    consumers: HashMap<String, Arc<ConsumerShared>>,
}

struct StreamInner {
    config: StreamConfig,
    state: Mutex<StreamState>,
}

impl StreamInner {
    fn listens_on(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }

    async fn forget(&self, sequence: u64) {
        if self.config.retention == RetentionPolicy::WorkQueue {
            self.state.lock().await.messages.remove(&sequence);
        }
    }
}

/// In-memory stream with durable pull consumers.
#[derive(Clone)]
pub struct MemoryStream {
    inner: Arc<StreamInner>,
}

impl MemoryStream {
    pub(crate) fn new(config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                config,
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    pub(crate) fn listens_on(&self, subject: &str) -> bool {
        self.inner.listens_on(subject)
    }

    /// Messages currently retained by the stream.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Publisher for MemoryStream {
    async fn publish(&self, message: OutboundMessage) -> StoreResult<u64> {
        let mut state = self.inner.state.lock().await;
        state.last_sequence += 1;
        let sequence = state.last_sequence;
        let stored = StoredMessage {
            message,
            published: Utc::now(),
        };

        for consumer in state.consumers.values() {
            if consumer.accepts(&stored.message.subject) {
                consumer.enqueue(sequence, stored.clone()).await;
            }
        }
        state.messages.insert(sequence, stored);
        Ok(sequence)
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    async fn consumer(&self, config: ConsumerConfig) -> StoreResult<Arc<dyn Consumer>> {
        let mut state = self.inner.state.lock().await;
        let shared = match state.consumers.get(&config.durable_name) {
            Some(existing) => existing.clone(),
            None => {
                let shared = Arc::new(ConsumerShared::new(config.clone()));
                for (sequence, stored) in &state.messages {
                    if shared.accepts(&stored.message.subject) {
                        shared.enqueue(*sequence, stored.clone()).await;
                    }
                }
                state
                    .consumers
                    .insert(config.durable_name.clone(), shared.clone());
                shared
            }
        };
        Ok(Arc::new(MemoryConsumer {
            shared,
            stream: self.inner.clone(),
        }))
    }
}

struct Pending {
    stored: StoredMessage,
    delivered: u32,
    available_at: Instant,
}

struct ConsumerShared {
    config: ConsumerConfig,
    pending: Mutex<BTreeMap<u64, Pending>>,
    notify: Notify,
}

impl ConsumerShared {
    fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
        }
    }

    fn accepts(&self, subject: &str) -> bool {
        self.config.filter_subjects.is_empty()
            || self
                .config
                .filter_subjects
                .iter()
                .any(|filter| subject_matches(filter, subject))
    }

    async fn enqueue(&self, sequence: u64, stored: StoredMessage) {
        self.pending.lock().await.insert(
            sequence,
            Pending {
                stored,
                delivered: 0,
                available_at: Instant::now(),
            },
        );
        self.notify.notify_waiters();
    }
}

enum Pick {
    Ready(u64, StoredMessage, u32),
    WaitUntil(Instant),
    Idle,
}

/// Handle to a durable consumer; clones share the same pending set.
struct MemoryConsumer {
    shared: Arc<ConsumerShared>,
    stream: Arc<StreamInner>,
}

impl MemoryConsumer {
    async fn pick(&self) -> Pick {
        let mut pending = self.shared.pending.lock().await;
        let now = Instant::now();
        let mut exhausted = Vec::new();
        let mut next_wake: Option<Instant> = None;
        let mut ready = None;

        for (sequence, entry) in pending.iter_mut() {
            if entry.available_at > now {
                next_wake = Some(next_wake.map_or(entry.available_at, |w| w.min(entry.available_at)));
                continue;
            }
            if let Some(max) = self.shared.config.max_deliver {
                if entry.delivered >= max {
                    exhausted.push(*sequence);
                    continue;
                }
            }
            entry.delivered += 1;
            entry.available_at = now + self.shared.config.ack_wait;
            ready = Some((*sequence, entry.stored.clone(), entry.delivered));
            break;
        }

        for sequence in &exhausted {
            pending.remove(sequence);
            warn!(
                consumer = %self.shared.config.durable_name,
                sequence,
                "Dropping message after reaching max deliveries"
            );
        }
        drop(pending);
        for sequence in exhausted {
            self.stream.forget(sequence).await;
        }

        match (ready, next_wake) {
            (Some((sequence, stored, delivered)), _) => Pick::Ready(sequence, stored, delivered),
            (None, Some(at)) => Pick::WaitUntil(at),
            (None, None) => Pick::Idle,
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn name(&self) -> &str {
        &self.shared.config.durable_name
    }

    async fn next(&self) -> StoreResult<Delivery> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.pick().await {
                Pick::Ready(sequence, stored, delivered) => {
                    if delivered > 1 {
                        debug!(
                            consumer = %self.shared.config.durable_name,
                            sequence,
                            delivered,
                            "Redelivering message"
                        );
                    }
                    let info = DeliveryInfo {
                        stream: self.stream.config.name.clone(),
                        consumer: self.shared.config.durable_name.clone(),
                        stream_sequence: sequence,
                        delivered,
                        published: stored.published,
                    };
                    let acker: Arc<dyn Acker> = Arc::new(MemoryAcker {
                        shared: self.shared.clone(),
                        stream: self.stream.clone(),
                    });
                    return Ok(Delivery::new(stored.message, info, acker));
                }
                Pick::WaitUntil(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                Pick::Idle => notified.await,
            }
        }
    }
}

struct MemoryAcker {
    shared: Arc<ConsumerShared>,
    stream: Arc<StreamInner>,
}

impl MemoryAcker {
    async fn settle(&self, sequence: u64) {
        self.shared.pending.lock().await.remove(&sequence);
        self.stream.forget(sequence).await;
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, sequence: u64) -> StoreResult<()> {
        self.settle(sequence).await;
        Ok(())
    }

    async fn nak(&self, sequence: u64, delay: Option<Duration>) -> StoreResult<()> {
        let mut pending = self.shared.pending.lock().await;
        if let Some(entry) = pending.get_mut(&sequence) {
            entry.available_at = Instant::now() + delay.unwrap_or(Duration::ZERO);
        }
        drop(pending);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self, sequence: u64, reason: &str) -> StoreResult<()> {
        debug!(
            consumer = %self.shared.config.durable_name,
            sequence,
            reason,
            "Message terminated"
        );
        self.settle(sequence).await;
        Ok(())
    }

    async fn in_progress(&self, sequence: u64) -> StoreResult<()> {
        let mut pending = self.shared.pending.lock().await;
        if let Some(entry) = pending.get_mut(&sequence) {
            entry.available_at = Instant::now() + self.shared.config.ack_wait;
        }
        Ok(())
    }
}
