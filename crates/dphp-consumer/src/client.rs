//! Publishing events onto the stream from outside a transition.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use dphp_auth::Operation;
use dphp_store::{Broker, OutboundMessage};
use dphp_types::{EntityId, HeaderName, OrchestrationId, StateId, User};
use tracing::debug;
use uuid::Uuid;

use crate::config::DEFAULT_NAMESPACE;
use crate::error::ConsumerResult;

pub const START_EXECUTION: &str = "StartExecution";
pub const RAISE_EVENT: &str = "RaiseEvent";

/// Publishes events on behalf of an optional principal.
#[derive(Clone)]
pub struct DurableClient {
    broker: Arc<dyn Broker>,
    namespace: String,
    principal: Option<User>,
}

impl DurableClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            namespace: DEFAULT_NAMESPACE.to_string(),
            principal: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Act as `user`. Without a principal messages are anonymous.
    pub fn with_principal(mut self, user: User) -> Self {
        self.principal = Some(user);
        self
    }

    /// Build the message delivering `payload` to `destination`.
    pub fn message(
        &self,
        destination: &StateId,
        event_type: &str,
        target_type: &str,
        payload: impl Into<Bytes>,
        operations: &[Operation],
    ) -> OutboundMessage {
        let operations = operations
            .iter()
            .map(Operation::as_str)
            .collect::<Vec<_>>()
            .join(",");
        OutboundMessage::new(destination.to_subject().namespaced(&self.namespace), payload)
            .with_header(HeaderName::StateId, destination.to_string())
            .with_header(HeaderName::EventType, event_type)
            .with_header(HeaderName::TargetType, target_type)
            .with_header(
                HeaderName::EmittedAt,
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            )
            .with_header(
                HeaderName::Provenance,
                User::to_provenance(self.principal.as_ref()),
            )
            .with_header(HeaderName::TargetOperations, operations)
            .with_header(HeaderName::CorrelationId, Uuid::new_v4().to_string())
    }

    async fn send(&self, message: OutboundMessage) -> ConsumerResult<u64> {
        debug!(subject = %message.subject, "Publishing client event");
        Ok(self.broker.publish(message).await?)
    }

    /// Deliver a serialized operation call to an entity.
    pub async fn signal_entity(
        &self,
        entity: EntityId,
        payload: impl Into<Bytes>,
    ) -> ConsumerResult<u64> {
        let message = self.message(
            &entity.into(),
            RAISE_EVENT,
            "Entity",
            payload,
            &[Operation::Signal],
        );
        self.send(message).await
    }

    /// Start an orchestration instance, generating an execution id when
    /// none is given.
    pub async fn start_orchestration(
        &self,
        instance_id: impl Into<String>,
        execution_id: Option<String>,
        payload: impl Into<Bytes>,
    ) -> ConsumerResult<OrchestrationId> {
        let id = OrchestrationId {
            instance_id: instance_id.into(),
            execution_id: execution_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        };
        let message = self.message(
            &id.clone().into(),
            START_EXECUTION,
            "Orchestration",
            payload,
            &[Operation::Signal],
        );
        self.send(message).await?;
        Ok(id)
    }

    /// Raise an external event on a running orchestration.
    pub async fn raise_orchestration_event(
        &self,
        instance: OrchestrationId,
        payload: impl Into<Bytes>,
    ) -> ConsumerResult<u64> {
        let message = self.message(
            &instance.into(),
            RAISE_EVENT,
            "Orchestration",
            payload,
            &[Operation::Signal],
        );
        self.send(message).await
    }
}
