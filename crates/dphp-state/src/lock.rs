//! Per-subject mutual exclusion over a versioned key-value cell.
//!
//! Each subject gets its own bucket (named by [`Subject::bucket`]) holding a
//! single [`LOCK_KEY`]. An absent or empty value means free; [`LOCK_VALUE`]
//! means held. Taking the lock is a create-if-absent or a compare-and-swap
//! against the observed revision, so exactly one contender wins each
//! free-to-held transition. Losers watch the key and try again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dphp_store::{Broker, KeyValue, KvConfig};
use dphp_types::Subject;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LockError, LockResult};

pub const LOCK_KEY: &str = "lock";
pub const LOCK_VALUE: &str = "locked";

/// Pause before re-reading a lock whose watch ended without an update.
const WATCH_RETRY: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockConfig {
    /// Upper bound on how long an abandoned lock survives.
    pub ttl: Duration,
    /// Give up waiting after this long; `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            acquire_timeout: None,
        }
    }
}

enum Attempt {
    Acquired(u64),
    Held(u64),
    Raced,
}

/// Hands out [`LockGuard`]s for subjects.
#[derive(Clone)]
pub struct SubjectLock {
    broker: Arc<dyn Broker>,
    config: LockConfig,
}

impl SubjectLock {
    pub fn new(broker: Arc<dyn Broker>, config: LockConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    async fn bucket(&self, subject: &Subject) -> LockResult<Arc<dyn KeyValue>> {
        let config = KvConfig::new(subject.bucket())
            .with_description(format!("Lock for {subject}"))
            .with_ttl(self.config.ttl);
        Ok(self.broker.key_value(config).await?)
    }

    /// Block the calling task until the lock for `subject` is held.
    pub async fn acquire(&self, subject: &Subject) -> LockResult<LockGuard> {
        self.acquire_until_cancelled(subject, &CancellationToken::new())
            .await
    }

    /// Like [`SubjectLock::acquire`], giving up with
    /// [`LockError::Cancelled`] once `cancel` fires.
    pub async fn acquire_until_cancelled(
        &self,
        subject: &Subject,
        cancel: &CancellationToken,
    ) -> LockResult<LockGuard> {
        let kv = self.bucket(subject).await?;
        let started = Instant::now();
        let deadline = self.config.acquire_timeout.map(|t| started + t);

        loop {
            let revision = match try_acquire(kv.as_ref()).await? {
                Attempt::Acquired(revision) => {
                    debug!(subject = %subject, revision, "Got lock");
                    return Ok(LockGuard {
                        kv,
                        subject: subject.clone(),
                        revision,
                        released: false,
                    });
                }
                Attempt::Raced => continue,
                Attempt::Held(revision) => revision,
            };

            debug!(subject = %subject, revision, "Waiting for lock");
            let mut watcher = kv.watch(LOCK_KEY, revision + 1).await?;

            // An expired lock produces no update, so re-read after one TTL.
            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = until(deadline) => {
                    return Err(LockError::Timeout {
                        subject: subject.to_string(),
                        waited: started.elapsed(),
                    });
                }
                update = watcher.next() => {
                    if update.is_none() {
                        tokio::time::sleep(WATCH_RETRY).await;
                    }
                }
                _ = tokio::time::sleep(self.config.ttl) => {}
            }
        }
    }

    /// Clear the lock for `subject` regardless of who holds it.
    pub async fn force_release(&self, subject: &Subject) -> LockResult<()> {
        let kv = self.bucket(subject).await?;
        kv.put(LOCK_KEY, Bytes::new()).await?;
        Ok(())
    }
}

async fn try_acquire(kv: &dyn KeyValue) -> LockResult<Attempt> {
    let attempt = match kv.get(LOCK_KEY).await? {
        None => kv.create(LOCK_KEY, Bytes::from_static(LOCK_VALUE.as_bytes())).await,
        Some(entry) if entry.value.is_empty() => {
            kv.update(
                LOCK_KEY,
                Bytes::from_static(LOCK_VALUE.as_bytes()),
                entry.revision,
            )
            .await
        }
        Some(entry) => return Ok(Attempt::Held(entry.revision)),
    };

    match attempt {
        Ok(revision) => Ok(Attempt::Acquired(revision)),
        Err(e) if e.is_conflict() => Ok(Attempt::Raced),
        Err(e) => Err(e.into()),
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A held subject lock.
///
/// Call [`LockGuard::release`]; a guard dropped without it releases in a
/// background task.
pub struct LockGuard {
    kv: Arc<dyn KeyValue>,
    subject: Subject,
    revision: u64,
    released: bool,
}

impl LockGuard {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Revision at which the lock was taken.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.kv.put(LOCK_KEY, Bytes::new()).await?;
        debug!(subject = %self.subject, "Released lock");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(subject = %self.subject, "Lock dropped outside a runtime; left to expire");
            return;
        };
        let kv = self.kv.clone();
        let subject = self.subject.clone();
        handle.spawn(async move {
            if let Err(e) = kv.put(LOCK_KEY, Bytes::new()).await {
                warn!(subject = %subject, error = %e, "Failed to release dropped lock");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dphp_store::MemoryBroker;
    use dphp_types::StateId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn locker() -> (SubjectLock, Subject) {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let subject = StateId::entity("Counter", "1").to_subject();
        (SubjectLock::new(broker, LockConfig::default()), subject)
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let (locks, subject) = locker();
        let guard = locks.acquire(&subject).await.unwrap();
        assert!(guard.revision() > 0);
        guard.release().await.unwrap();
        let again = locks.acquire(&subject).await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (locks, subject) = locker();
        locks.force_release(&subject).await.unwrap();
        locks.force_release(&subject).await.unwrap();
        locks.acquire(&subject).await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let (locks, subject) = locker();
        let guard = locks.acquire(&subject).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let subject = subject.clone();
            tokio::spawn(async move { locks.acquire(&subject).await.map(|g| g.revision()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let held_at = guard.revision();
        guard.release().await.unwrap();
        let revision = waiter.await.unwrap().unwrap();
        assert!(revision > held_at);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let subject = StateId::entity("Counter", "2").to_subject();
        let config = LockConfig {
            acquire_timeout: Some(Duration::from_secs(1)),
            ..LockConfig::default()
        };
        let locks = SubjectLock::new(broker, config);
        let _held = locks.acquire(&subject).await.unwrap();
        let err = locks.acquire(&subject).await.err().unwrap();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let (locks, subject) = locker();
        let _held = locks.acquire(&subject).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = locks
            .acquire_until_cancelled(&subject, &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LockError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_lock_expires() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let subject = StateId::activity("a").to_subject();
        let config = LockConfig {
            ttl: Duration::from_secs(10),
            acquire_timeout: None,
        };
        let locks = SubjectLock::new(broker, config);
        let abandoned = locks.acquire(&subject).await.unwrap();
        std::mem::forget(abandoned);
        let guard = locks.acquire(&subject).await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contenders_never_overlap() {
        let (locks, subject) = locker();
        let inside = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let subject = subject.clone();
            let inside = inside.clone();
            let entered = entered.clone();
            tasks.push(tokio::spawn(async move {
                let guard = locks.acquire(&subject).await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                entered.fetch_add(1, Ordering::SeqCst);
                guard.release().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 8);
    }
}
