use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KeyValue, KvConfig, KvEntry, KvOperation, KvWatcher};

const WATCH_CAPACITY: usize = 1024;

struct Slot {
    entry: KvEntry,
    written: Instant,
}

#[derive(Default)]
struct KvState {
    revision: u64,
    slots: HashMap<String, Slot>,
}

/// In-memory key-value bucket.
///
/// Only the latest revision of each key is retained. Entries older than the
/// bucket TTL are treated as absent the next time they are read.
pub struct MemoryKv {
    config: KvConfig,
    state: Mutex<KvState>,
    updates: broadcast::Sender<KvEntry>,
}

impl MemoryKv {
    pub(crate) fn new(config: KvConfig) -> Self {
        let (updates, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            config,
            state: Mutex::new(KvState::default()),
            updates,
        }
    }

    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    fn expired(&self, slot: &Slot) -> bool {
        self.config
            .ttl
            .map(|ttl| slot.written.elapsed() >= ttl)
            .unwrap_or(false)
    }

    fn live<'a>(&self, state: &'a KvState, key: &str) -> Option<&'a Slot> {
        state
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_deleted() && !self.expired(slot))
    }

    fn write(&self, state: &mut KvState, key: &str, value: Bytes, operation: KvOperation) -> KvEntry {
        state.revision += 1;
        let entry = KvEntry {
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            value,
            revision: state.revision,
            created: Utc::now(),
            operation,
        };
        state.slots.insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                written: Instant::now(),
            },
        );
        // No receivers is fine.
        let _ = self.updates.send(entry.clone());
        entry
    }
}

#[async_trait]
impl KeyValue for MemoryKv {
    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        let state = self.state.lock().await;
        Ok(self.live(&state, key).map(|slot| slot.entry.clone()))
    }

    async fn create(&self, key: &str, value: Bytes) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        if self.live(&state, key).is_some() {
            return Err(StoreError::KeyExists {
                bucket: self.config.bucket.clone(),
                key: key.to_string(),
            });
        }
        Ok(self.write(&mut state, key, value, KvOperation::Put).revision)
    }

    async fn update(&self, key: &str, value: Bytes, expected_revision: u64) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let current = self
            .live(&state, key)
            .map(|slot| slot.entry.revision)
            .unwrap_or(0);
        if current != expected_revision {
            return Err(StoreError::WrongRevision {
                bucket: self.config.bucket.clone(),
                key: key.to_string(),
                expected: expected_revision,
                current,
            });
        }
        Ok(self.write(&mut state, key, value, KvOperation::Put).revision)
    }

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(self.write(&mut state, key, value, KvOperation::Put).revision)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.write(&mut state, key, Bytes::new(), KvOperation::Delete);
        Ok(())
    }

    async fn purge(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.write(&mut state, key, Bytes::new(), KvOperation::Purge);
        state.slots.remove(key);
        Ok(())
    }

    async fn watch(&self, key: &str, from_revision: u64) -> StoreResult<KvWatcher> {
        // Subscribe while holding the state lock so no write slips between
        // the snapshot and the subscription.
        let state = self.state.lock().await;
        let receiver = self.updates.subscribe();
        let initial: Vec<KvEntry> = state
            .slots
            .get(key)
            .filter(|slot| slot.entry.revision >= from_revision && !self.expired(slot))
            .map(|slot| slot.entry.clone())
            .into_iter()
            .collect();
        drop(state);

        let updates = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(entry) => return Some((entry, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        let key = key.to_string();
        let filtered = updates.filter(move |entry| {
            futures::future::ready(entry.key == key && entry.revision >= from_revision)
        });

        Ok(KvWatcher::new(stream::iter(initial).chain(filtered).boxed()))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| !slot.entry.is_deleted() && !self.expired(slot))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
