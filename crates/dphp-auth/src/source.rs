use std::collections::BTreeMap;

use async_trait::async_trait;
use dphp_glue::{Bridge, CallContext, Method, PERMISSIONS_HEADER, STATE_ID_ENV};
use dphp_types::{Headers, StateId};
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::permissions::CreatePermissions;

/// Where creation policies come from.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn permissions(&self, id: &StateId) -> AuthResult<CreatePermissions>;
}

/// Asks the executor through the bridge's `getPermissions` entry point.
///
/// The executor answers in the `Permissions` response header.
#[derive(Clone)]
pub struct GluePermissionSource {
    bridge: Bridge,
}

impl GluePermissionSource {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl PermissionSource for GluePermissionSource {
    async fn permissions(&self, id: &StateId) -> AuthResult<CreatePermissions> {
        let payload = tempfile::NamedTempFile::new()?.into_temp_path();
        let glue = self
            .bridge
            .call(Method::GetPermissions, Vec::new(), payload.to_path_buf());

        let mut env = BTreeMap::new();
        env.insert(STATE_ID_ENV.to_string(), id.to_string());
        let outcome = self
            .bridge
            .execute(
                &glue,
                Headers::new(),
                env,
                CallContext {
                    current: Some(id),
                    principal: None,
                },
            )
            .await?;
        if outcome.status >= 500 {
            return Err(AuthError::PermissionsUnavailable(format!(
                "executor answered {} for {id}",
                outcome.status
            )));
        }

        let raw = outcome
            .headers
            .get_non_empty(PERMISSIONS_HEADER)
            .ok_or_else(|| {
                AuthError::InvalidPermissions(format!(
                    "executor returned no permissions for {id} (status {})",
                    outcome.status
                ))
            })?;
        let permissions: CreatePermissions = serde_json::from_str(raw)?;
        permissions.validate()?;
        debug!(state_id = %id, mode = %permissions.mode, "Loaded permissions");
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Mode;
    use dphp_glue::mocks::MockExecutor;
    use dphp_state::StateStore;
    use dphp_store::MemoryBroker;
    use std::sync::Arc;

    fn source(executor: MockExecutor) -> (GluePermissionSource, MockExecutor) {
        let state = StateStore::new(Arc::new(MemoryBroker::new()));
        let bridge = Bridge::new(Arc::new(executor.clone()), state, "bootstrap.php");
        (GluePermissionSource::new(bridge), executor)
    }

    #[tokio::test]
    async fn reads_permissions_header() {
        let (source, executor) = source(MockExecutor::new().with_permissions(serde_json::json!({
            "mode": "auth",
            "limits": {"user": -1, "role": -1, "global": -1},
            "users": [],
            "roles": [],
            "ttl": 0
        })));
        let id = StateId::entity("Counter", "1");
        let perms = source.permissions(&id).await.unwrap();
        assert_eq!(perms.mode, Mode::Authenticated);

        let calls = executor.calls_to(Method::GetPermissions);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].env.get(STATE_ID_ENV).map(String::as_str), Some("entity:Counter:1"));
    }

    #[tokio::test]
    async fn missing_header_is_invalid() {
        let (source, _) = source(MockExecutor::new());
        let err = source
            .permissions(&StateId::activity("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPermissions(_)));
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let (source, _) = source(MockExecutor::new().with_output(
            Method::GetPermissions,
            503,
            vec!["database is down".to_string()],
        ));
        let err = source
            .permissions(&StateId::entity("Counter", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionsUnavailable(_)));
    }
}
