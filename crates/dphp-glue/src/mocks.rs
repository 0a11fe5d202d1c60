//! Scripted executors for tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::GlueResult;
use crate::executor::{ExecutionRequest, Executor, ExecutorIo, ExecutorOutput};
use crate::method::Method;
use crate::protocol::PERMISSIONS_HEADER;

type Handler = Arc<dyn Fn(ExecutionRequest, ExecutorIo) -> BoxFuture<'static, GlueResult<()>> + Send + Sync>;

/// Executor answering each [`Method`] with a scripted handler.
///
/// Methods without a handler succeed with no output. Every request is
/// recorded.
#[derive(Clone, Default)]
pub struct MockExecutor {
    handlers: HashMap<Method, Handler>,
    calls: Arc<Mutex<Vec<ExecutionRequest>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `method` with `handler`.
    pub fn on<F, Fut>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(ExecutionRequest, ExecutorIo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GlueResult<()>> + Send + 'static,
    {
        self.handlers.insert(
            method,
            Arc::new(move |request, io| handler(request, io).boxed()),
        );
        self
    }

    /// Answer `method` with a fixed status and output lines.
    pub fn with_output(self, method: Method, status: u16, lines: Vec<String>) -> Self {
        self.on(method, move |_request, io| {
            let lines = lines.clone();
            async move {
                io.output.send(ExecutorOutput::Status(status)).await.ok();
                for line in lines {
                    io.output.send(ExecutorOutput::Line(line)).await.ok();
                }
                Ok(())
            }
        })
    }

    /// Answer permission lookups with `document` in the permissions header.
    pub fn with_permissions(self, document: serde_json::Value) -> Self {
        let document = document.to_string();
        self.on(Method::GetPermissions, move |_request, io| {
            let value = document.clone();
            async move {
                io.output
                    .send(ExecutorOutput::Header {
                        name: PERMISSIONS_HEADER.to_string(),
                        value,
                    })
                    .await
                    .ok();
                Ok(())
            }
        })
    }

    /// Requests seen so far, oldest first.
    pub fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, method: Method) -> Vec<ExecutionRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.function == method)
            .collect()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, request: ExecutionRequest, io: ExecutorIo) -> GlueResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        match self.handlers.get(&request.function) {
            Some(handler) => handler(request, io).await,
            None => Ok(()),
        }
    }
}
