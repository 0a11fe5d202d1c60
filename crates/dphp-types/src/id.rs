use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Separator between identifier segments in string form.
pub const ID_SEPARATOR: char = ':';

/// Kind of durable state an identifier addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Activity,
    Entity,
    Orchestration,
}

impl IdKind {
    pub const ALL: [IdKind; 3] = [IdKind::Activity, IdKind::Entity, IdKind::Orchestration];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Activity => "activity",
            IdKind::Entity => "entity",
            IdKind::Orchestration => "orchestration",
        }
    }

    /// Number of `:`-separated segments the payload of this kind carries.
    fn payload_segments(&self) -> usize {
        match self {
            IdKind::Activity => 1,
            IdKind::Entity | IdKind::Orchestration => 2,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activity" => Ok(IdKind::Activity),
            "entity" => Ok(IdKind::Entity),
            "orchestration" => Ok(IdKind::Orchestration),
            other => Err(TypesError::malformed(other, "unknown identifier kind")),
        }
    }
}

/// Structured identifier of a piece of durable state.
///
/// String form is `<kind>:<payload>`; the payload is kind specific:
/// `activity:<id>`, `entity:<name>:<id>`, `orchestration:<instance>:<execution>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateId {
    pub kind: IdKind,
    pub id: String,
}

impl StateId {
    /// Parse the `<kind>:<payload>` string form.
    pub fn parse(input: &str) -> Result<Self, TypesError> {
        let mut parts = input.split(ID_SEPARATOR);
        let kind = match parts.next() {
            Some(k) if !k.is_empty() => k.parse::<IdKind>().map_err(|_| {
                TypesError::malformed(input, format!("unknown identifier kind {k:?}"))
            })?,
            _ => return Err(TypesError::malformed(input, "missing identifier kind")),
        };

        let payload: Vec<&str> = parts.collect();
        if payload.len() != kind.payload_segments() {
            return Err(TypesError::malformed(
                input,
                format!(
                    "{} identifiers carry {} payload segment(s), found {}",
                    kind,
                    kind.payload_segments(),
                    payload.len()
                ),
            ));
        }

        Ok(Self {
            kind,
            id: payload.join(":"),
        })
    }

    pub fn activity(id: impl Into<String>) -> Self {
        ActivityId { id: id.into() }.into()
    }

    pub fn entity(name: impl Into<String>, id: impl Into<String>) -> Self {
        EntityId {
            name: name.into(),
            id: id.into(),
        }
        .into()
    }

    pub fn orchestration(instance_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        OrchestrationId {
            instance_id: instance_id.into(),
            execution_id: execution_id.into(),
        }
        .into()
    }

    /// Stream-safe subject derived from this identifier.
    pub fn to_subject(&self) -> Subject {
        Subject::from_state_id(self)
    }

    /// Logical name of the addressed definition: the entity name, the
    /// orchestration instance, or `"activity"` for activities.
    pub fn name(&self) -> &str {
        match self.kind {
            IdKind::Activity => IdKind::Activity.as_str(),
            _ => self
                .id
                .split_once(ID_SEPARATOR)
                .map(|(before, _)| before)
                .unwrap_or(&self.id),
        }
    }

    pub fn to_activity_id(&self) -> Option<ActivityId> {
        match self.kind {
            IdKind::Activity => Some(ActivityId {
                id: self.id.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_entity_id(&self) -> Option<EntityId> {
        match self.kind {
            IdKind::Entity => {
                let (name, id) = self.id.split_once(ID_SEPARATOR)?;
                Some(EntityId {
                    name: name.to_string(),
                    id: id.to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn to_orchestration_id(&self) -> Option<OrchestrationId> {
        match self.kind {
            IdKind::Orchestration => {
                let (instance, execution) = self.id.split_once(ID_SEPARATOR)?;
                Some(OrchestrationId {
                    instance_id: instance.to_string(),
                    execution_id: execution.to_string(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for StateId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateId::parse(s)
    }
}

impl TryFrom<String> for StateId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StateId::parse(&value)
    }
}

impl From<StateId> for String {
    fn from(id: StateId) -> Self {
        id.to_string()
    }
}

// ---- Typed views ----

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActivityId {
    pub id: String,
}

impl From<ActivityId> for StateId {
    fn from(a: ActivityId) -> Self {
        StateId {
            kind: IdKind::Activity,
            id: a.id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub name: String,
    pub id: String,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

impl From<EntityId> for StateId {
    fn from(e: EntityId) -> Self {
        StateId {
            kind: IdKind::Entity,
            id: e.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrchestrationId {
    pub instance_id: String,
    pub execution_id: String,
}

impl fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.execution_id)
    }
}

impl From<OrchestrationId> for StateId {
    fn from(o: OrchestrationId) -> Self {
        StateId {
            kind: IdKind::Orchestration,
            id: o.to_string(),
        }
    }
}

// ---- Subjects ----

/// Sanitized, `.`-joined form of a [`StateId`], safe to use as a stream
/// subject token sequence and (via [`Subject::bucket`]) as a bucket name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    pub fn from_state_id(id: &StateId) -> Self {
        let full = format!("{}:{}", id.kind, id.id);
        let pieces: Vec<String> = full.split(ID_SEPARATOR).map(sanitize_segment).collect();
        Subject(pieces.join("."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bucket name for per-subject key-value buckets (`.` replaced by `_`).
    pub fn bucket(&self) -> String {
        self.0.replace('.', "_")
    }

    /// Subject with the stream namespace prepended.
    pub fn namespaced(&self, namespace: &str) -> String {
        format!("{}.{}", namespace, self.0)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_subject_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn sanitize_segment(segment: &str) -> String {
    segment.chars().filter(|c| is_subject_char(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_each_kind() {
        let a = StateId::parse("activity:abc").unwrap();
        assert_eq!(a.kind, IdKind::Activity);
        assert_eq!(a.id, "abc");

        let e = StateId::parse("entity:Counter:42").unwrap();
        assert_eq!(e.kind, IdKind::Entity);
        assert_eq!(e.to_entity_id().unwrap().name, "Counter");

        let o = StateId::parse("orchestration:Hello:exec-1").unwrap();
        let oid = o.to_orchestration_id().unwrap();
        assert_eq!(oid.instance_id, "Hello");
        assert_eq!(oid.execution_id, "exec-1");
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        let err = StateId::parse("widget:abc").unwrap_err();
        assert!(matches!(err, TypesError::MalformedIdentifier { .. }));
    }

    #[test]
    fn parse_rejects_wrong_segment_count() {
        assert!(StateId::parse("entity:only-name").is_err());
        assert!(StateId::parse("activity:a:b").is_err());
        assert!(StateId::parse("orchestration:a:b:c").is_err());
        assert!(StateId::parse("").is_err());
    }

    #[test]
    fn name_per_kind() {
        assert_eq!(StateId::activity("x").name(), "activity");
        assert_eq!(StateId::entity("Counter", "1").name(), "Counter");
        assert_eq!(StateId::orchestration("Flow", "e").name(), "Flow");
    }

    #[test]
    fn typed_views_only_match_their_kind() {
        let e = StateId::entity("Counter", "1");
        assert!(e.to_activity_id().is_none());
        assert!(e.to_orchestration_id().is_none());
        assert_eq!(StateId::from(e.to_entity_id().unwrap()), e);
    }

    #[test]
    fn subject_strips_unsafe_characters() {
        let id = StateId::entity("My Counter!", "user@example.com");
        assert_eq!(id.to_subject().as_str(), "entity.MyCounter.userexample.com");
        assert_eq!(id.to_subject().bucket(), "entity_MyCounter_userexample_com");
    }

    #[test]
    fn subject_namespacing() {
        let id = StateId::orchestration("Flow", "abc");
        assert_eq!(id.to_subject().namespaced("dphp"), "dphp.orchestration.Flow.abc");
    }

    #[test]
    fn serde_uses_string_form() {
        let id = StateId::entity("Counter", "7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"entity:Counter:7\"");
        let back: StateId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[^:]{0,16}"
    }

    fn any_state_id() -> impl Strategy<Value = StateId> {
        prop_oneof![
            segment().prop_map(StateId::activity),
            (segment(), segment()).prop_map(|(n, i)| StateId::entity(n, i)),
            (segment(), segment()).prop_map(|(n, i)| StateId::orchestration(n, i)),
        ]
    }

    proptest! {
        #[test]
        fn round_trips_through_string_form(id in any_state_id()) {
            let parsed = StateId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn subject_keeps_only_safe_characters(id in any_state_id()) {
            let subject = id.to_subject();
            prop_assert!(subject.as_str().chars().all(|c| is_subject_char(c)));

            let expected: Vec<String> = format!("{}:{}", id.kind, id.id)
                .split(':')
                .map(|s| s.chars().filter(|c| is_subject_char(*c)).collect())
                .collect();
            prop_assert_eq!(subject.as_str(), expected.join("."));
        }
    }
}
