use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dphp_types::Headers;
use tokio::sync::mpsc;

use crate::error::GlueResult;
use crate::method::Method;

/// One item of executor output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutorOutput {
    /// A line of the executor's output stream.
    Line(String),
    /// The response status.
    Status(u16),
    /// A response header.
    Header { name: String, value: String },
}

/// A call handed to an executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub function: Method,
    /// Request headers, including the `DPHP_*` call headers.
    pub headers: Headers,
    pub env: BTreeMap<String, String>,
    /// Start of the request body: the JSON input list and a blank line.
    /// Query replies follow on the input channel.
    pub body: String,
    pub payload: PathBuf,
}

/// Channels connecting a running executor to the bridge.
#[derive(Debug)]
pub struct ExecutorIo {
    pub output: mpsc::Sender<ExecutorOutput>,
    /// Query replies to append to the request body.
    pub input: mpsc::Receiver<String>,
}

/// Runs user code for a call.
///
/// Implementations stream output through [`ExecutorIo::output`] while
/// running and return once the call has finished.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest, io: ExecutorIo) -> GlueResult<()>;
}
