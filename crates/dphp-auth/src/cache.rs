use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::permissions::CreatePermissions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a fetched policy is reused; `None` keeps it until
    /// invalidated.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Clone, Debug)]
struct CachedPermissions {
    permissions: CreatePermissions,
    fetched: Instant,
}

/// Creation policies keyed by definition name.
///
/// Every entity named `Counter` shares one policy, so the key is
/// [`dphp_types::StateId::name`], not the full identifier.
#[derive(Clone, Debug, Default)]
pub struct PermissionCache {
    entries: Arc<DashMap<String, CachedPermissions>>,
    config: CacheConfig,
}

impl PermissionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn get(&self, name: &str) -> Option<CreatePermissions> {
        let entry = self.entries.get(name)?;
        if let Some(ttl) = self.config.ttl {
            if entry.fetched.elapsed() >= ttl {
                drop(entry);
                self.entries.remove(name);
                return None;
            }
        }
        Some(entry.permissions.clone())
    }

    pub fn insert(&self, name: impl Into<String>, permissions: CreatePermissions) {
        self.entries.insert(
            name.into(),
            CachedPermissions {
                permissions,
                fetched: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Mode;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = PermissionCache::new(CacheConfig {
            ttl: Some(Duration::from_secs(10)),
        });
        cache.insert("Counter", CreatePermissions::new(Mode::Anonymous));
        assert_eq!(cache.get("Counter").unwrap().mode, Mode::Anonymous);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("Counter").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_ttl_keeps_entries() {
        let cache = PermissionCache::new(CacheConfig { ttl: None });
        cache.insert("Flow", CreatePermissions::new(Mode::Explicit));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(cache.get("Flow").is_some());

        cache.invalidate("Flow");
        assert!(cache.get("Flow").is_none());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = PermissionCache::default();
        let other = cache.clone();
        cache.insert("a", CreatePermissions::default());
        assert_eq!(other.len(), 1);
        other.clear();
        assert!(cache.is_empty());
    }
}
