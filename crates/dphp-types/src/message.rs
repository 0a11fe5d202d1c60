use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::id::StateId;

/// Event record emitted by the executor on an `EVENT~!~` line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub target_type: String,
    #[serde(default)]
    pub source_ops: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default)]
    pub target_ops: String,
}

impl EventMessage {
    pub fn from_json(raw: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn destination_id(&self) -> Result<StateId, TypesError> {
        StateId::parse(&self.destination)
    }

    pub fn reply_to_id(&self) -> Result<Option<StateId>, TypesError> {
        if self.reply_to.is_empty() {
            return Ok(None);
        }
        StateId::parse(&self.reply_to).map(Some)
    }

    /// Event type without its namespace (`A\B\RaiseEvent` -> `RaiseEvent`).
    pub fn short_event_type(&self) -> &str {
        self.event_type
            .rsplit('\\')
            .next()
            .unwrap_or(&self.event_type)
    }

    /// The schedule time, if it lies after `now`.
    pub fn delayed_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule_at.filter(|at| *at > now)
    }
}
