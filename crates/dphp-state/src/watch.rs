use std::sync::Arc;
use std::time::Duration;

use dphp_store::{Broker, KvEntry};
use dphp_types::{IdKind, StateId};
use tracing::debug;

use crate::checkout::orchestration_bucket;
use crate::error::{StateError, StateResult};

/// Wait for the orchestration state of `id` to move past `after_revision`.
///
/// Returns `None` when nothing changed within `timeout`.
pub async fn wait_for_update(
    broker: &Arc<dyn Broker>,
    id: &StateId,
    after_revision: u64,
    timeout: Duration,
) -> StateResult<Option<KvEntry>> {
    if id.kind != IdKind::Orchestration {
        return Err(StateError::NotWatchable {
            kind: id.kind.to_string(),
        });
    }

    let kv = broker.key_value(orchestration_bucket()).await?;
    let key = id.to_subject().to_string();
    let mut watcher = kv.watch(&key, after_revision + 1).await?;

    match tokio::time::timeout(timeout, watcher.next()).await {
        Ok(update) => Ok(update),
        Err(_) => {
            debug!(state_id = %id, after_revision, "No state update before timeout");
            Ok(None)
        }
    }
}
