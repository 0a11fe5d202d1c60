//! Consumer dispatch loop for the durable runtime.
//!
//! Messages arrive on per-kind durable consumers of the namespace stream.
//! The [`Dispatcher`] takes each through:
//! - delay and deletion handling
//! - the subject lock (entities only)
//! - authorization against the target's [`dphp_auth::Resource`]
//! - checkout, execution through the bridge, and commit
//! - publication of the events emitted by the executor
//!
//! [`Runtime`] wires the dispatcher to the store and runs one bounded worker
//! pool per kind. [`DurableClient`] publishes events from outside a
//! transition.

#![deny(unsafe_code)]

pub mod admin;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod runtime;

pub use admin::AdminAction;
pub use client::{DurableClient, RAISE_EVENT, START_EXECUTION};
pub use config::{ConsumerConfig, DEFAULT_NAMESPACE};
pub use dispatch::{Dispatcher, Outcome, CORRELATION_ID_ENV};
pub use error::{ConsumerError, ConsumerResult, Disposition};
pub use runtime::Runtime;
