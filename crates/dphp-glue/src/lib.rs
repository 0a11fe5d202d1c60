//! Execution bridge.
//!
//! A [`Glue`] call is marshalled into an [`ExecutionRequest`] and handed to
//! an [`Executor`]. The [`Bridge`] scans the executor's output with the line
//! protocol in [`protocol`], answering state queries as they arrive, and
//! returns the emitted events, response headers and status.

#![deny(unsafe_code)]

pub mod bridge;
pub mod error;
pub mod executor;
pub mod method;
pub mod mocks;
pub mod process;
pub mod protocol;

pub use bridge::{Bridge, CallContext, Glue, STATE_ID_ENV};
pub use error::{GlueError, GlueResult};
pub use executor::{ExecutionRequest, Executor, ExecutorIo, ExecutorOutput};
pub use method::Method;
pub use process::ProcessExecutor;
pub use protocol::{GlueOutcome, ResponseParser, PERMISSIONS_HEADER};
