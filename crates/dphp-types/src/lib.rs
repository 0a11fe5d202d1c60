//! Core types for the durable execution runtime.
//!
//! Everything that crosses a process or store boundary is defined here:
//! - Structured state identifiers and the stream-safe subjects derived from them
//! - Header names used on stream messages
//! - The acting principal (`User`) carried as provenance
//! - The event record emitted by the executor

#![deny(unsafe_code)]

pub mod error;
pub mod headers;
pub mod id;
pub mod message;
pub mod user;

pub use error::TypesError;
pub use headers::{HeaderName, Headers};
pub use id::{ActivityId, EntityId, IdKind, OrchestrationId, StateId, Subject};
pub use message::EventMessage;
pub use user::{Role, User, UserId};
