//! Materialising persisted state into a scratch file and committing it back.
//!
//! Orchestration state lives in the [`ORCHESTRATION_BUCKET`] key-value bucket
//! and commits with compare-and-swap against the revision seen at checkout.
//! Activity and entity state lives in one object store per kind: every commit
//! stores a new object revision, repoints the subject's link at it and only
//! then deletes the revision the link used to point at.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dphp_store::{Broker, KeyValue, KvConfig, ObjectMeta, ObjectStore, ObjectStoreConfig};
use dphp_types::{HeaderName, Headers, IdKind, StateId};
use tempfile::TempPath;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StateError, StateResult};

pub const ORCHESTRATION_BUCKET: &str = "orchestration";

/// Bucket configuration for orchestration state.
pub fn orchestration_bucket() -> KvConfig {
    KvConfig::new(ORCHESTRATION_BUCKET)
        .with_description("Holds orchestration state and history")
        .with_compression(true)
}

/// Object store configuration for activity or entity state.
pub fn object_store_for(kind: IdKind) -> ObjectStoreConfig {
    ObjectStoreConfig::new(kind.as_str()).with_description(format!("Holds {kind} state"))
}

/// Opens checkouts of durable state.
#[derive(Clone)]
pub struct StateStore {
    broker: Arc<dyn Broker>,
    scratch_dir: Option<PathBuf>,
    history_retention: Option<Duration>,
}

impl StateStore {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            scratch_dir: None,
            history_retention: None,
        }
    }

    /// Create scratch files under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Expire orchestration state this long after its last commit.
    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = Some(retention);
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    fn scratch_file(&self) -> StateResult<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("state");
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }

    async fn orchestrations(&self) -> StateResult<Arc<dyn KeyValue>> {
        let mut config = orchestration_bucket();
        if let Some(retention) = self.history_retention {
            config = config.with_ttl(retention);
        }
        Ok(self.broker.key_value(config).await?)
    }

    async fn objects(&self, kind: IdKind) -> StateResult<Arc<dyn ObjectStore>> {
        Ok(self.broker.object_store(object_store_for(kind)).await?)
    }

    /// Copy the current state of `id` into a fresh scratch file.
    ///
    /// The file always exists afterwards; it is empty when `id` has no state
    /// yet. It is removed when the [`Checkout`] is dropped.
    pub async fn checkout(&self, id: &StateId) -> StateResult<Checkout> {
        let path = self.scratch_file()?;
        let key = id.to_subject().to_string();
        debug!(state_id = %id, file = %path.display(), "Checking out state");

        let origin = match id.kind {
            IdKind::Orchestration => {
                let kv = self.orchestrations().await?;
                let revision = match kv.get(&key).await? {
                    Some(entry) => {
                        tokio::fs::write(&path, &entry.value).await?;
                        Some(entry.revision)
                    }
                    None => None,
                };
                Origin::KeyValue { kv, revision }
            }
            kind => {
                let store = self.objects(kind).await?;
                let observed = store.info(&key).await?.map(|info| info.nuid);
                if !store.get_file(&key, &path).await? {
                    tokio::fs::write(&path, b"").await?;
                }
                Origin::Object { store, observed }
            }
        };

        Ok(Checkout {
            id: id.clone(),
            key,
            path,
            origin,
        })
    }

    /// Current state of `id`, without a checkout.
    pub async fn read(&self, id: &StateId) -> StateResult<Option<Bytes>> {
        let key = id.to_subject().to_string();
        match id.kind {
            IdKind::Orchestration => Ok(self
                .orchestrations()
                .await?
                .get(&key)
                .await?
                .map(|entry| entry.value)),
            kind => Ok(self.objects(kind).await?.get(&key).await?),
        }
    }

    /// Subjects that currently hold state of `kind`.
    pub async fn list(&self, kind: IdKind) -> StateResult<Vec<String>> {
        match kind {
            IdKind::Orchestration => Ok(self.orchestrations().await?.keys().await?),
            kind => Ok(self
                .objects(kind)
                .await?
                .list()
                .await?
                .into_iter()
                .filter(|info| info.is_link())
                .map(|info| info.name)
                .collect()),
        }
    }

    /// Remove all state of `id`. Missing state is not an error.
    pub async fn delete(&self, id: &StateId) -> StateResult<()> {
        let key = id.to_subject().to_string();
        match id.kind {
            IdKind::Orchestration => self.orchestrations().await?.purge(&key).await?,
            kind => {
                let store = self.objects(kind).await?;
                if let Some(info) = store.info(&key).await? {
                    if let Some(link) = &info.link {
                        if let Err(e) = store.delete(&link.name).await {
                            if !e.is_not_found() {
                                return Err(e.into());
                            }
                        }
                    }
                    if let Err(e) = store.delete(&key).await {
                        if !e.is_not_found() {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
        debug!(state_id = %id, "Deleted state");
        Ok(())
    }
}

enum Origin {
    KeyValue {
        kv: Arc<dyn KeyValue>,
        revision: Option<u64>,
    },
    Object {
        store: Arc<dyn ObjectStore>,
        /// Revision of the subject's link when the checkout was taken.
        observed: Option<String>,
    },
}

/// A local working copy of one identifier's state.
pub struct Checkout {
    id: StateId,
    key: String,
    path: TempPath,
    origin: Origin,
}

impl Checkout {
    pub fn id(&self) -> &StateId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key-value revision observed at checkout (orchestrations only).
    pub fn revision(&self) -> Option<u64> {
        match &self.origin {
            Origin::KeyValue { revision, .. } => *revision,
            Origin::Object { .. } => None,
        }
    }

    pub async fn read(&self) -> StateResult<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&self.path).await?))
    }

    pub async fn write(&self, data: &[u8]) -> StateResult<()> {
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }

    fn conflict(&self, reason: impl Into<String>) -> StateError {
        StateError::ConcurrencyConflict {
            subject: self.key.clone(),
            reason: reason.into(),
        }
    }

    /// Persist the working copy.
    ///
    /// Fails with [`StateError::ConcurrencyConflict`], leaving the stored
    /// state untouched, when someone else committed since the checkout.
    pub async fn commit(self) -> StateResult<()> {
        let data = self.read().await?;
        match &self.origin {
            Origin::KeyValue { kv, revision } => {
                let result = match revision {
                    Some(revision) => kv.update(&self.key, data, *revision).await,
                    None => kv.create(&self.key, data).await,
                };
                match result {
                    Ok(revision) => {
                        debug!(state_id = %self.id, revision, "State committed");
                        Ok(())
                    }
                    Err(e) if e.is_conflict() => Err(self.conflict(e.to_string())),
                    Err(e) => Err(e.into()),
                }
            }
            Origin::Object { store, observed } => {
                let previous = store.info(&self.key).await?;
                if previous.as_ref().map(|info| &info.nuid) != observed.as_ref() {
                    return Err(self.conflict("link moved since checkout"));
                }

                let mut headers = Headers::new();
                headers.insert(HeaderName::StateId, self.id.to_string());
                let meta = ObjectMeta {
                    name: format!("{}/{}", self.key, Uuid::new_v4().simple()),
                    description: None,
                    headers: headers.clone(),
                };
                let stored = store.put(meta, data).await?;
                store.add_link(&self.key, &stored, headers).await?;
                debug!(state_id = %self.id, object = %stored.name, "State committed");

                // The new revision is reachable; dropping the old one may leak
                // it on failure but never loses state.
                if let Some(old) = previous.and_then(|info| info.link) {
                    if old.name != stored.name {
                        if let Err(e) = store.delete(&old.name).await {
                            warn!(state_id = %self.id, object = %old.name, error = %e, "Failed to delete previous state revision");
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("revision", &self.revision())
            .finish()
    }
}
