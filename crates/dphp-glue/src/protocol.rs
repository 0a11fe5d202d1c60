//! Line protocol spoken by the executor on its output stream.
//!
//! * `EVENT~!~<json>` emits an [`EventMessage`], published only after the
//!   caller commits state.
//! * `QUERY~!~<state id>~!~<token>` asks for a read-only checkout of another
//!   identifier; the reply `<token>://<path>` is written to the executor's
//!   input.
//! * anything else is log output.

use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dphp_store::OutboundMessage;
use dphp_types::{EventMessage, HeaderName, Headers, StateId, User};
use tracing::{debug, error, info};

use crate::error::{GlueError, GlueResult};

pub const SEPARATOR: &str = "~!~";
pub const EVENT_PREFIX: &str = "EVENT~!~";
pub const QUERY_PREFIX: &str = "QUERY~!~";
pub const STATUS_PREFIX: &str = "STATUS~!~";
pub const HEADER_PREFIX: &str = "HEADER~!~";

/// Response header carrying a permission document.
pub const PERMISSIONS_HEADER: &str = "Permissions";

/// Status assumed when the executor never reports one.
pub const DEFAULT_STATUS: u16 = 200;

#[derive(Clone, Debug, PartialEq)]
pub enum OutputLine {
    Event(EventMessage),
    Query { id: StateId, token: String },
    Log(String),
}

pub fn parse_line(line: &str) -> GlueResult<OutputLine> {
    if let Some(raw) = line.strip_prefix(EVENT_PREFIX) {
        let event = EventMessage::from_json(raw).map_err(|e| GlueError::MalformedOutput {
            line: line.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(OutputLine::Event(event));
    }

    if let Some(raw) = line.strip_prefix(QUERY_PREFIX) {
        let (id, token) = raw
            .split_once(SEPARATOR)
            .ok_or_else(|| GlueError::MalformedOutput {
                line: line.to_string(),
                reason: "query lines carry a state id and a token".to_string(),
            })?;
        return Ok(OutputLine::Query {
            id: StateId::parse(id)?,
            token: token.to_string(),
        });
    }

    Ok(OutputLine::Log(line.to_string()))
}

/// Reply to a query: where the executor finds the requested state.
pub fn query_reply(token: &str, path: &Path) -> String {
    format!("{}://{}\n", token, path.display())
}

/// Build the stream message for an emitted event.
///
/// The subject is the destination's un-namespaced subject; the publisher
/// prefixes the stream namespace.
pub fn event_to_message(
    event: &EventMessage,
    emitted_by: Option<&StateId>,
    provenance: Option<&User>,
    now: DateTime<Utc>,
) -> GlueResult<OutboundMessage> {
    let destination = event.destination_id()?;
    let mut message = OutboundMessage::new(
        destination.to_subject().to_string(),
        Bytes::from(event.event.clone()),
    );
    if let Some(reply_to) = event.reply_to_id()? {
        message.reply = Some(reply_to.to_subject().to_string());
    }

    let headers = &mut message.headers;
    headers.insert(HeaderName::StateId, destination.to_string());
    headers.insert(HeaderName::EventType, event.short_event_type());
    headers.insert(HeaderName::TargetType, event.target_type.as_str());
    headers.insert(
        HeaderName::EmittedAt,
        now.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    headers.insert(HeaderName::Provenance, User::to_provenance(provenance));
    headers.insert(HeaderName::TargetOperations, event.target_ops.as_str());
    headers.insert(HeaderName::SourceOperations, event.source_ops.as_str());
    headers.insert(HeaderName::Meta, event.meta.as_str());
    if let Some(emitted_by) = emitted_by {
        headers.insert(HeaderName::EmittedBy, emitted_by.to_string());
    }
    if let Some(at) = event.delayed_until(now) {
        headers.insert(
            HeaderName::Delay,
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    Ok(message)
}

/// Result of one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlueOutcome {
    /// Emitted events in emission order, not yet published.
    pub events: Vec<OutboundMessage>,
    pub headers: Headers,
    pub status: u16,
}

impl GlueOutcome {
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// A state query raised mid-execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub id: StateId,
    pub token: String,
}

/// Accumulates executor output into a [`GlueOutcome`].
pub struct ResponseParser {
    current: Option<StateId>,
    provenance: Option<User>,
    outcome: GlueOutcome,
    is_error: bool,
}

impl ResponseParser {
    pub fn new(current: Option<StateId>, provenance: Option<User>) -> Self {
        Self {
            current,
            provenance,
            outcome: GlueOutcome {
                status: DEFAULT_STATUS,
                ..Default::default()
            },
            is_error: false,
        }
    }

    pub fn set_status(&mut self, status: u16) {
        if status >= 500 {
            self.is_error = true;
        }
        self.outcome.status = status;
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.outcome.headers.append(name, value);
    }

    /// Consume one output line. Returns the query to answer, if the line
    /// was one.
    pub fn feed(&mut self, line: &str) -> GlueResult<Option<Query>> {
        match parse_line(line)? {
            OutputLine::Event(event) => {
                debug!(destination = %event.destination, event_type = %event.event_type, "Detected event");
                let message = event_to_message(
                    &event,
                    self.current.as_ref(),
                    self.provenance.as_ref(),
                    Utc::now(),
                )?;
                self.outcome.events.push(message);
                Ok(None)
            }
            OutputLine::Query { id, token } => {
                debug!(state_id = %id, token = %token, "Performing query");
                Ok(Some(Query { id, token }))
            }
            OutputLine::Log(text) => {
                let state_id = self.current.as_ref().map(ToString::to_string).unwrap_or_default();
                if self.is_error {
                    error!(target: "dphp::executor", state_id = %state_id, "{}", text);
                } else {
                    info!(target: "dphp::executor", state_id = %state_id, "{}", text);
                }
                Ok(None)
            }
        }
    }

    pub fn finish(self) -> GlueOutcome {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dphp_types::Role;

    fn event_json(schedule_at: &str) -> String {
        format!(
            r#"{{"destination":"entity:Counter:1","replyTo":"orchestration:Flow:e1","scheduleAt":"{schedule_at}","eventId":"1","event":"{{\"n\":1}}","eventType":"Bottledcode\\DurablePhp\\Events\\RaiseEvent","targetType":"entity","sourceOps":"output","meta":"","targetOps":"signal,lock"}}"#
        )
    }

    #[test]
    fn parses_each_line_kind() {
        let line = format!("{}{}", EVENT_PREFIX, event_json("2020-01-01T00:00:00Z"));
        assert!(matches!(parse_line(&line).unwrap(), OutputLine::Event(_)));

        match parse_line("QUERY~!~entity:Counter:2~!~q1").unwrap() {
            OutputLine::Query { id, token } => {
                assert_eq!(id, StateId::entity("Counter", "2"));
                assert_eq!(token, "q1");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            parse_line("hello").unwrap(),
            OutputLine::Log("hello".to_string())
        );
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(matches!(
            parse_line("EVENT~!~{oops"),
            Err(GlueError::MalformedOutput { .. })
        ));
        assert!(matches!(
            parse_line("QUERY~!~entity:Counter:2"),
            Err(GlueError::MalformedOutput { .. })
        ));
        assert!(matches!(
            parse_line("QUERY~!~bogus~!~q"),
            Err(GlueError::Types(_))
        ));
    }

    #[test]
    fn event_becomes_message_with_headers() {
        let event = EventMessage::from_json(&event_json("2020-01-01T00:00:00Z")).unwrap();
        let emitter = StateId::orchestration("Flow", "e1");
        let user = User::new("alice", vec![Role::new("ops")]);
        let message = event_to_message(&event, Some(&emitter), Some(&user), Utc::now()).unwrap();

        assert_eq!(message.subject, "entity.Counter.1");
        assert_eq!(message.reply.as_deref(), Some("orchestration.Flow.e1"));
        assert_eq!(&message.payload[..], br#"{"n":1}"#);
        let h = &message.headers;
        assert_eq!(h.get(HeaderName::StateId), Some("entity:Counter:1"));
        assert_eq!(h.get(HeaderName::EventType), Some("RaiseEvent"));
        assert_eq!(h.get(HeaderName::TargetType), Some("entity"));
        assert_eq!(h.get(HeaderName::TargetOperations), Some("signal,lock"));
        assert_eq!(h.get(HeaderName::SourceOperations), Some("output"));
        assert_eq!(h.get(HeaderName::EmittedBy), Some("orchestration:Flow:e1"));
        assert_eq!(
            User::from_provenance(h.get(HeaderName::Provenance).unwrap()),
            Some(user)
        );
        assert!(h.get(HeaderName::EmittedAt).is_some());
        assert!(!h.contains(HeaderName::Delay));
    }

    #[test]
    fn future_schedule_sets_delay() {
        let at = (Utc::now() + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let event = EventMessage::from_json(&event_json(&at)).unwrap();
        let message = event_to_message(&event, None, None, Utc::now()).unwrap();
        assert_eq!(message.headers.get(HeaderName::Delay), Some(at.as_str()));
        assert_eq!(message.headers.get(HeaderName::Provenance), Some("null"));
        assert!(!message.headers.contains(HeaderName::EmittedBy));
    }

    #[test]
    fn parser_collects_events_and_status() {
        let mut parser = ResponseParser::new(Some(StateId::activity("a")), None);
        let line = format!("{}{}", EVENT_PREFIX, event_json("2020-01-01T00:00:00Z"));
        assert_eq!(parser.feed(&line).unwrap(), None);
        assert_eq!(parser.feed("plain log line").unwrap(), None);
        let query = parser.feed("QUERY~!~activity:b~!~t").unwrap().unwrap();
        assert_eq!(query.id, StateId::activity("b"));
        parser.set_status(503);
        parser.add_header("Permissions", "{}");
        assert_eq!(parser.feed("now logged as error").unwrap(), None);

        let outcome = parser.finish();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.status, 503);
        assert!(outcome.is_failure());
        assert_eq!(outcome.headers.get("permissions"), Some("{}"));
    }

    #[test]
    fn reply_format() {
        assert_eq!(query_reply("q1", Path::new("/tmp/state")), "q1:///tmp/state\n");
    }
}
