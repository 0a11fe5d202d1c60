//! Processing of a single stream message.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dphp_auth::{parse_operations, AuthError, Operation, ResourceManager, DELETE_SUFFIX};
use dphp_glue::{Bridge, CallContext, GlueError, Method};
use dphp_state::SubjectLock;
use dphp_store::{Broker, Delivery};
use dphp_types::{HeaderName, Headers, IdKind, StateId, User};
use serde_json::Value;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::admin::AdminAction;
use crate::error::{ConsumerError, ConsumerResult, Disposition};

/// Environment variable carrying the correlation id into the executor.
pub const CORRELATION_ID_ENV: &str = "CORRELATION_ID";

/// How a message was handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Requeued until its `Delay` has passed.
    Delayed(Duration),
    /// The identifier's state was deleted.
    Deleted(StateId),
    /// An admin action was applied to the identifier's resource.
    Administered(StateId),
    /// Executed and committed; `published` events were sent on.
    Processed { id: StateId, published: usize },
}

/// Runs messages through lock, authorization, execution and commit.
#[derive(Clone)]
pub struct Dispatcher {
    namespace: String,
    broker: Arc<dyn Broker>,
    bridge: Bridge,
    lock: SubjectLock,
    resources: Option<ResourceManager>,
    heartbeat: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        namespace: impl Into<String>,
        broker: Arc<dyn Broker>,
        bridge: Bridge,
        lock: SubjectLock,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            broker,
            bridge,
            lock,
            resources: None,
            heartbeat: None,
        }
    }

    /// Report progress on in-flight deliveries every `every`.
    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = (!every.is_zero()).then_some(every);
        self
    }

    /// Check every message against `resources` before executing it.
    pub fn with_resources(mut self, resources: ResourceManager) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn resources(&self) -> Option<&ResourceManager> {
        self.resources.as_ref()
    }

    /// Process `delivery` and settle it with the stream.
    ///
    /// Errors are settled according to [`ConsumerError::disposition`] and
    /// returned for inspection; they never need further handling.
    pub async fn handle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> ConsumerResult<Outcome> {
        let correlation_id = delivery
            .headers
            .get_non_empty(HeaderName::CorrelationId)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!(
            "dispatch",
            correlation_id = %correlation_id,
            subject = %delivery.subject,
            delivered = delivery.info.delivered,
            state_id = tracing::field::Empty,
        );

        async move {
            let result = self
                .keep_alive(&delivery, self.process(&delivery, cancel, &correlation_id))
                .await;
            settle(&delivery, &result).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn keep_alive<F: Future>(&self, delivery: &Delivery, work: F) -> F::Output {
        let Some(every) = self.heartbeat else {
            return work.await;
        };
        tokio::pin!(work);
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => {
                    if let Err(e) = delivery.in_progress().await {
                        warn!(error = %e, "Failed to report progress");
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        delivery: &Delivery,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> ConsumerResult<Outcome> {
        if let Some(delay) = first_delivery_delay(&delivery.headers, delivery.info.delivered, Utc::now())? {
            return Ok(Outcome::Delayed(delay));
        }

        let id = state_id(&delivery.headers)?;
        Span::current().record("state_id", tracing::field::display(&id));

        if is_deletion(&self.namespace, &delivery.subject, &id) {
            self.delete(&id).await?;
            return Ok(Outcome::Deleted(id));
        }

        let guard = match id.kind {
            IdKind::Entity => Some(
                self.lock
                    .acquire_until_cancelled(&id.to_subject(), cancel)
                    .await?,
            ),
            _ => None,
        };

        let result = self.transition(delivery, &id, correlation_id).await;

        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                warn!(error = %e, "Failed to release lock");
            }
        }
        result
    }

    async fn transition(
        &self,
        delivery: &Delivery,
        id: &StateId,
        correlation_id: &str,
    ) -> ConsumerResult<Outcome> {
        let principal = delivery
            .headers
            .get(HeaderName::Provenance)
            .and_then(User::from_provenance);

        if let Some(resources) = &self.resources {
            if let Some(outcome) = self
                .authorize(resources, &delivery.headers, id, principal.as_ref())
                .await?
            {
                return Ok(outcome);
            }
        }

        let checkout = self.bridge.state().checkout(id).await?;
        let event = Value::String(String::from_utf8_lossy(&delivery.payload).into_owned());
        let glue = self
            .bridge
            .call(Method::ProcessMessage, vec![event], checkout.path());

        let mut headers = delivery.headers.clone();
        headers.insert(HeaderName::CorrelationId, correlation_id);
        let mut env = BTreeMap::new();
        env.insert(CORRELATION_ID_ENV.to_string(), correlation_id.to_string());

        let outcome = self
            .bridge
            .execute(
                &glue,
                headers,
                env,
                CallContext {
                    current: Some(id),
                    principal: principal.as_ref(),
                },
            )
            .await?;
        if outcome.is_failure() {
            return Err(GlueError::executor_failure(
                outcome.status,
                format!("Received error {} from Task", outcome.status),
            )
            .into());
        }

        checkout.commit().await?;

        let published = outcome.events.len();
        for mut message in outcome.events {
            message.subject = format!("{}.{}", self.namespace, message.subject);
            message
                .headers
                .insert(HeaderName::CorrelationId, correlation_id);
            debug!(destination = %message.subject, "Sending event");
            self.broker.publish(message).await?;
        }
        Ok(Outcome::Processed {
            id: id.clone(),
            published,
        })
    }

    /// Check source and target operations. `Some` ends processing early.
    async fn authorize(
        &self,
        resources: &ResourceManager,
        headers: &Headers,
        id: &StateId,
        principal: Option<&User>,
    ) -> ConsumerResult<Option<Outcome>> {
        let source_ops =
            parse_operations(headers.get(HeaderName::SourceOperations).unwrap_or_default())?;
        if let Some(first) = source_ops.first() {
            let source = match headers.get_non_empty(HeaderName::EmittedBy) {
                Some(raw) => StateId::parse(raw)?,
                None => return Err(AuthError::NotAuthorized { operation: *first }.into()),
            };
            let resource = resources.discover(&source, principal, true).await?;
            for op in &source_ops {
                resource.require(*op, principal)?;
            }
        }

        let target_ops =
            parse_operations(headers.get(HeaderName::TargetOperations).unwrap_or_default())?;
        let action = AdminAction::from_meta(headers.get(HeaderName::Meta).unwrap_or_default())?;
        if target_ops.is_empty() && action.is_none() {
            return Ok(None);
        }

        let create = target_ops.iter().any(Operation::implies_creation);
        let mut resource = resources.discover(id, principal, !create).await?;

        if let Some(action) = action {
            action.apply(&mut resource, principal)?;
            resources.update(id, &mut resource).await?;
            info!(action = ?action, "Applied admin action");
            return Ok(Some(Outcome::Administered(id.clone())));
        }

        for op in &target_ops {
            resource.require(*op, principal)?;
        }
        Ok(None)
    }

    async fn delete(&self, id: &StateId) -> ConsumerResult<()> {
        self.bridge.state().delete(id).await?;
        if let Some(resources) = &self.resources {
            resources.purge(id).await?;
        }
        info!("Deleted state");
        Ok(())
    }
}

async fn settle(delivery: &Delivery, result: &ConsumerResult<Outcome>) {
    let settled = match result {
        Ok(Outcome::Delayed(delay)) => {
            info!(delay_ms = delay.as_millis() as u64, "Delaying message");
            delivery.nak_with_delay(*delay).await
        }
        Ok(outcome) => {
            debug!(outcome = ?outcome, "Processed message");
            delivery.ack().await
        }
        Err(e) => match e.disposition() {
            Disposition::Ack => {
                warn!(error = %e, "Dropping rejected message");
                delivery.ack().await
            }
            Disposition::Nak => {
                warn!(error = %e, "Processing failed; message will be redelivered");
                delivery.nak().await
            }
            Disposition::Term(reason) => {
                error!(error = %e, "Terminating message");
                delivery.term_with_reason(&reason).await
            }
        },
    };
    if let Err(e) = settled {
        error!(error = %e, "Failed to settle message");
    }
}

/// Delay still owed on the first delivery of a message with a `Delay`
/// header.
pub fn first_delivery_delay(
    headers: &Headers,
    delivered: u32,
    now: DateTime<Utc>,
) -> ConsumerResult<Option<Duration>> {
    if delivered != 1 {
        return Ok(None);
    }
    let Some(raw) = headers.get_non_empty(HeaderName::Delay) else {
        return Ok(None);
    };
    let at = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| ConsumerError::invalid_header("Delay", raw, e.to_string()))?;
    Ok((at.with_timezone(&Utc) - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero()))
}

pub fn state_id(headers: &Headers) -> ConsumerResult<StateId> {
    let raw = headers
        .get_non_empty(HeaderName::StateId)
        .ok_or(ConsumerError::MissingHeader("State-Id"))?;
    Ok(StateId::parse(raw)?)
}

/// Is `subject` the deletion subject of `id`?
///
/// Comparing against the identifier keeps an entity that happens to be
/// named `delete` from being mistaken for a deletion.
pub fn is_deletion(namespace: &str, subject: &str, id: &StateId) -> bool {
    subject
        .strip_suffix(DELETE_SUFFIX)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|rest| rest == id.to_subject().namespaced(namespace))
}
