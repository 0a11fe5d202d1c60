use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dphp_store::{Broker, KeyValue, KvConfig, OutboundMessage, StorageKind};
use dphp_types::{HeaderName, StateId, User};
use tracing::{debug, info, warn};

use crate::cache::PermissionCache;
use crate::error::{AuthError, AuthResult};
use crate::operation::Mode;
use crate::permissions::CreatePermissions;
use crate::resource::Resource;
use crate::source::PermissionSource;

pub const RESOURCES_BUCKET: &str = "resources";

/// Last subject token of a deletion message.
pub const DELETE_SUFFIX: &str = "delete";

pub fn resources_bucket() -> KvConfig {
    KvConfig::new(RESOURCES_BUCKET)
        .with_description("Access control records for durable state")
        .with_storage(StorageKind::File)
}

/// Build the message that deletes `id`'s state, optionally not before `at`.
pub fn delete_message(namespace: &str, id: &StateId, at: Option<DateTime<Utc>>) -> OutboundMessage {
    let subject = format!("{}.{}", id.to_subject().namespaced(namespace), DELETE_SUFFIX);
    let mut message = OutboundMessage::new(subject, Bytes::new())
        .with_header(HeaderName::StateId, id.to_string());
    if let Some(at) = at {
        message.headers.insert(
            HeaderName::Delay,
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    message
}

/// Loads, creates and persists [`Resource`]s.
#[derive(Clone)]
pub struct ResourceManager {
    broker: Arc<dyn Broker>,
    kv: Arc<dyn KeyValue>,
    namespace: String,
    source: Arc<dyn PermissionSource>,
    cache: PermissionCache,
}

impl ResourceManager {
    pub async fn open(
        broker: Arc<dyn Broker>,
        namespace: impl Into<String>,
        source: Arc<dyn PermissionSource>,
        cache: PermissionCache,
    ) -> AuthResult<Self> {
        let kv = broker.key_value(resources_bucket()).await?;
        Ok(Self {
            broker,
            kv,
            namespace: namespace.into(),
            source,
            cache,
        })
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    /// Creation policy for `id`'s definition, cached by name.
    pub async fn permissions(&self, id: &StateId) -> AuthResult<CreatePermissions> {
        if let Some(cached) = self.cache.get(id.name()) {
            return Ok(cached);
        }
        let permissions = self.source.permissions(id).await?;
        self.cache.insert(id.name(), permissions.clone());
        Ok(permissions)
    }

    /// Load `id`'s resource, creating it for `principal` when missing and
    /// `prevent_creation` is not set.
    pub async fn discover(
        &self,
        id: &StateId,
        principal: Option<&User>,
        prevent_creation: bool,
    ) -> AuthResult<Resource> {
        let key = id.to_subject().to_string();
        match self.kv.get(&key).await? {
            Some(entry) => {
                let mut resource = Resource::from_bytes(&entry.value, entry.revision)?;
                self.refresh(id, &mut resource).await;
                Ok(resource)
            }
            None if prevent_creation => Err(AuthError::ResourceNotFound(id.to_string())),
            None => {
                let permissions = self.permissions(id).await?;
                let mut resource = Resource::new(principal, Mode::Explicit);
                if !resource.is_permitted(&permissions, principal, Utc::now()) {
                    return Err(AuthError::NotAuthorizedToCreate { id: id.to_string() });
                }
                self.update(id, &mut resource).await?;
                info!(state_id = %id, mode = %resource.mode, "Created resource");

                if let Some(at) = resource.expires.filter(|at| *at > Utc::now()) {
                    self.schedule_delete(id, at).await?;
                }
                Ok(resource)
            }
        }
    }

    /// Re-apply the current policy mode. Failures are logged, not returned.
    async fn refresh(&self, id: &StateId, resource: &mut Resource) {
        let permissions = match self.permissions(id).await {
            Ok(permissions) => permissions,
            Err(e) => {
                warn!(state_id = %id, error = %e, "Failed to load permissions");
                return;
            }
        };
        if resource.apply_permissions(&permissions) {
            if let Err(e) = self.update(id, resource).await {
                warn!(state_id = %id, error = %e, "Failed to persist permission refresh");
            }
        }
    }

    /// Persist `resource`, creating it when it has never been stored.
    ///
    /// Fails with a store conflict when another writer got there first.
    pub async fn update(&self, id: &StateId, resource: &mut Resource) -> AuthResult<()> {
        let key = id.to_subject().to_string();
        let value = Bytes::from(resource.to_bytes()?);
        let revision = match resource.revision() {
            0 => self.kv.create(&key, value).await?,
            current => self.kv.update(&key, value, current).await?,
        };
        resource.set_revision(revision);
        debug!(state_id = %id, revision, "Stored resource");
        Ok(())
    }

    /// Publish a deletion of `id` to be processed no earlier than `at`.
    pub async fn schedule_delete(&self, id: &StateId, at: DateTime<Utc>) -> AuthResult<()> {
        self.broker
            .publish(delete_message(&self.namespace, id, Some(at)))
            .await?;
        debug!(state_id = %id, at = %at, "Scheduled deletion");
        Ok(())
    }

    /// Delete `id`'s resource now and publish the deletion of its state.
    pub async fn delete(&self, id: &StateId) -> AuthResult<()> {
        self.kv.delete(&id.to_subject().to_string()).await?;
        self.broker
            .publish(delete_message(&self.namespace, id, None))
            .await?;
        info!(state_id = %id, "Deleted resource");
        Ok(())
    }

    /// Remove `id`'s resource without publishing anything.
    pub async fn purge(&self, id: &StateId) -> AuthResult<()> {
        self.kv.purge(&id.to_subject().to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use async_trait::async_trait;
    use dphp_store::{Consumer, ConsumerConfig, MemoryBroker, MessageStream, StreamConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed {
        permissions: CreatePermissions,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionSource for Fixed {
        async fn permissions(&self, _id: &StateId) -> AuthResult<CreatePermissions> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.permissions.clone())
        }
    }

    async fn manager(permissions: CreatePermissions) -> (ResourceManager, MemoryBroker, Arc<Fixed>) {
        let broker = MemoryBroker::new();
        broker
            .stream(StreamConfig::new("dphp", vec!["dphp.>".to_string()]))
            .await
            .unwrap();
        let source = Arc::new(Fixed {
            permissions,
            calls: AtomicUsize::new(0),
        });
        let manager = ResourceManager::open(
            Arc::new(broker.clone()),
            "dphp",
            source.clone(),
            PermissionCache::default(),
        )
        .await
        .unwrap();
        (manager, broker, source)
    }

    fn alice() -> User {
        User::new("alice", vec![])
    }

    #[tokio::test]
    async fn creates_missing_resource_for_principal() {
        let (manager, _, _) = manager(CreatePermissions::new(Mode::Authenticated)).await;
        let id = StateId::entity("Counter", "1");

        let resource = manager.discover(&id, Some(&alice()), false).await.unwrap();
        assert!(resource.is_owner(Some(&alice())));
        assert_eq!(resource.mode, Mode::Authenticated);
        assert!(resource.revision() > 0);

        let again = manager.discover(&id, None, true).await.unwrap();
        assert_eq!(again.owners, resource.owners);
        assert_eq!(again.revision(), resource.revision());
    }

    #[tokio::test]
    async fn creation_denied_by_policy() {
        let (manager, _, _) = manager(CreatePermissions::new(Mode::Authenticated)).await;
        let err = manager
            .discover(&StateId::entity("Counter", "1"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotAuthorizedToCreate { .. }));
    }

    #[tokio::test]
    async fn prevent_creation_reports_missing() {
        let (manager, _, _) = manager(CreatePermissions::new(Mode::Anonymous)).await;
        let err = manager
            .discover(&StateId::activity("a"), Some(&alice()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn permissions_are_cached_by_name() {
        let (manager, _, source) = manager(CreatePermissions::new(Mode::Anonymous)).await;
        manager
            .discover(&StateId::entity("Counter", "1"), None, false)
            .await
            .unwrap();
        manager
            .discover(&StateId::entity("Counter", "2"), None, false)
            .await
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mode_change_is_persisted_on_discover() {
        let (manager, _, _) = manager(CreatePermissions::new(Mode::Anonymous)).await;
        let id = StateId::entity("Counter", "1");
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        manager.update(&id, &mut resource).await.unwrap();

        let found = manager.discover(&id, None, true).await.unwrap();
        assert_eq!(found.mode, Mode::Anonymous);
        assert!(found.revision() > resource.revision());
        assert!(found.want_to(Operation::Signal, None));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let (manager, _, _) = manager(CreatePermissions::new(Mode::Anonymous)).await;
        let id = StateId::entity("Counter", "1");
        let mut first = manager.discover(&id, Some(&alice()), false).await.unwrap();
        let mut second = first.clone();

        first.grant_user("bob".into(), Operation::Call, Some(&alice())).unwrap();
        manager.update(&id, &mut first).await.unwrap();

        second.grant_user("carol".into(), Operation::Call, Some(&alice())).unwrap();
        match manager.update(&id, &mut second).await {
            Err(AuthError::Store(e)) => assert!(e.is_conflict()),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expiring_resources_schedule_their_deletion() {
        let perms = CreatePermissions {
            ttl: Duration::from_secs(3600).as_nanos() as u64,
            ..CreatePermissions::new(Mode::Anonymous)
        };
        let (manager, broker, _) = manager(perms).await;
        let id = StateId::entity("Counter", "1");
        let resource = manager.discover(&id, None, false).await.unwrap();
        assert!(resource.expires.is_some());

        let stream = broker.memory_stream("dphp").await.unwrap();
        let consumer = stream
            .consumer(ConsumerConfig::new("all", vec!["dphp.>".to_string()]))
            .await
            .unwrap();
        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.subject, "dphp.entity.Counter.1.delete");
        assert_eq!(delivery.headers.get(HeaderName::StateId), Some("entity:Counter:1"));
        assert!(delivery.headers.get_non_empty(HeaderName::Delay).is_some());
    }

    #[tokio::test]
    async fn delete_removes_record_and_publishes() {
        let (manager, broker, _) = manager(CreatePermissions::new(Mode::Anonymous)).await;
        let id = StateId::orchestration("Flow", "e1");
        manager.discover(&id, None, false).await.unwrap();
        manager.delete(&id).await.unwrap();

        assert!(matches!(
            manager.discover(&id, None, true).await,
            Err(AuthError::ResourceNotFound(_))
        ));
        let stream = broker.memory_stream("dphp").await.unwrap();
        assert_eq!(stream.len().await, 1);
    }

    #[test]
    fn delete_message_shape() {
        let at = Utc::now();
        let message = delete_message("ns", &StateId::activity("a-1"), Some(at));
        assert_eq!(message.subject, "ns.activity.a-1.delete");
        assert_eq!(message.headers.get(HeaderName::StateId), Some("activity:a-1"));
        assert_eq!(
            message.headers.get(HeaderName::Delay),
            Some(at.to_rfc3339_opts(SecondsFormat::Secs, true).as_str())
        );
    }
}
