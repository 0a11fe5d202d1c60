//! Reading stored state for the `inspect` command.

use bytes::Bytes;
use dphp_state::StateStore;
use dphp_types::{IdKind, StateId};

use crate::error::DaemonResult;

#[derive(Debug, PartialEq, Eq)]
pub enum Inspection {
    /// Stored identifiers of one kind.
    Keys(Vec<String>),
    /// One identifier's state, if it has any.
    State(StateId, Option<Bytes>),
}

/// List `kind`'s stored state, or read one identifier's when `id` is given.
///
/// `id` is the identifier without its kind prefix (`Counter:1` for an
/// entity).
pub async fn inspect(store: &StateStore, kind: IdKind, id: Option<&str>) -> DaemonResult<Inspection> {
    match id {
        None => Ok(Inspection::Keys(store.list(kind).await?)),
        Some(id) => {
            let id = StateId::parse(&format!("{kind}:{id}"))?;
            let state = store.read(&id).await?;
            Ok(Inspection::State(id, state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dphp_store::MemoryBroker;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_and_reads_state() {
        let store = StateStore::new(Arc::new(MemoryBroker::new()));
        let id = StateId::entity("Counter", "1");
        let checkout = store.checkout(&id).await.unwrap();
        checkout.write(b"42").await.unwrap();
        checkout.commit().await.unwrap();

        let Inspection::Keys(keys) = inspect(&store, IdKind::Entity, None).await.unwrap() else {
            panic!("expected keys");
        };
        assert_eq!(keys.len(), 1);

        let found = inspect(&store, IdKind::Entity, Some("Counter:1")).await.unwrap();
        assert_eq!(found, Inspection::State(id, Some(Bytes::from_static(b"42"))));

        let missing = inspect(&store, IdKind::Entity, Some("Counter:2")).await.unwrap();
        assert!(matches!(missing, Inspection::State(_, None)));
    }

    #[tokio::test]
    async fn malformed_id_is_rejected() {
        let store = StateStore::new(Arc::new(MemoryBroker::new()));
        assert!(inspect(&store, IdKind::Entity, Some("no-separator")).await.is_err());
    }
}
