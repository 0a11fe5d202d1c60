//! dphpd library
//!
//! - Layered configuration ([`DaemonConfig`])
//! - Runtime startup and shutdown ([`Daemon`])
//! - State inspection for the `inspect` command

#![deny(unsafe_code)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod inspect;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use inspect::{inspect, Inspection};
