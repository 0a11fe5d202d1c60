use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dphp_state::{Checkout, StateStore};
use dphp_types::{Headers, StateId, User};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::GlueResult;
use crate::executor::{ExecutionRequest, Executor, ExecutorIo, ExecutorOutput};
use crate::method::Method;
use crate::protocol::{query_reply, GlueOutcome, ResponseParser};

pub const BOOTSTRAP_HEADER: &str = "DPHP_BOOTSTRAP";
pub const FUNCTION_HEADER: &str = "DPHP_FUNCTION";
pub const PAYLOAD_HEADER: &str = "DPHP_PAYLOAD";
pub const PROVENANCE_HEADER: &str = "DPHP_PROVENANCE";
pub const STATE_ID_ENV: &str = "STATE_ID";

const CHANNEL_CAPACITY: usize = 64;

/// A single call into the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct Glue {
    bootstrap: String,
    function: Method,
    input: Vec<Value>,
    payload: PathBuf,
}

impl Glue {
    pub fn new(
        bootstrap: impl Into<String>,
        function: Method,
        input: Vec<Value>,
        payload: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bootstrap: bootstrap.into(),
            function,
            input,
            payload: payload.into(),
        }
    }

    pub fn function(&self) -> Method {
        self.function
    }

    pub fn payload(&self) -> &Path {
        &self.payload
    }

    /// Marshal the call: `DPHP_*` headers on top of `headers`, and the input
    /// list as a JSON body terminated by a blank line.
    pub fn request(
        &self,
        mut headers: Headers,
        env: BTreeMap<String, String>,
    ) -> GlueResult<ExecutionRequest> {
        headers.append(BOOTSTRAP_HEADER, self.bootstrap.as_str());
        headers.append(FUNCTION_HEADER, self.function.as_str());
        headers.append(PAYLOAD_HEADER, self.payload.to_string_lossy());
        let body = format!("{}\n\n", serde_json::to_string(&self.input)?);
        Ok(ExecutionRequest {
            function: self.function,
            headers,
            env,
            body,
            payload: self.payload.clone(),
        })
    }
}

/// Who is executing, for emitted-event headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallContext<'a> {
    pub current: Option<&'a StateId>,
    pub principal: Option<&'a User>,
}

/// Executes [`Glue`] calls and answers their state queries.
#[derive(Clone)]
pub struct Bridge {
    executor: Arc<dyn Executor>,
    state: StateStore,
    bootstrap: String,
}

impl Bridge {
    pub fn new(executor: Arc<dyn Executor>, state: StateStore, bootstrap: impl Into<String>) -> Self {
        Self {
            executor,
            state,
            bootstrap: bootstrap.into(),
        }
    }

    pub fn bootstrap(&self) -> &str {
        &self.bootstrap
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// A call using this bridge's bootstrap file.
    pub fn call(&self, function: Method, input: Vec<Value>, payload: impl Into<PathBuf>) -> Glue {
        Glue::new(self.bootstrap.clone(), function, input, payload)
    }

    /// Run `glue` to completion.
    ///
    /// Query checkouts stay alive until the call returns. A response status
    /// of 400 or above is reported in the outcome, not as an error.
    pub async fn execute(
        &self,
        glue: &Glue,
        mut headers: Headers,
        mut env: BTreeMap<String, String>,
        ctx: CallContext<'_>,
    ) -> GlueResult<GlueOutcome> {
        headers.insert(PROVENANCE_HEADER, User::to_provenance(ctx.principal));
        if let Some(current) = ctx.current {
            env.entry(STATE_ID_ENV.to_string())
                .or_insert_with(|| current.to_string());
        }
        let request = glue.request(headers, env)?;

        let (output_tx, mut output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let io = ExecutorIo {
            output: output_tx,
            input: input_rx,
        };

        debug!(function = %glue.function, "Executing event handler");
        let run = self.executor.execute(request, io);
        tokio::pin!(run);

        let mut parser = ResponseParser::new(ctx.current.cloned(), ctx.principal.cloned());
        let mut queries: Vec<Checkout> = Vec::new();
        let mut finished = None;

        loop {
            tokio::select! {
                result = &mut run, if finished.is_none() => finished = Some(result),
                item = output_rx.recv() => match item {
                    Some(ExecutorOutput::Line(line)) => {
                        if let Some(query) = parser.feed(&line)? {
                            let checkout = self.state.checkout(&query.id).await?;
                            let reply = query_reply(&query.token, checkout.path());
                            if input_tx.send(reply).await.is_err() {
                                debug!(token = %query.token, "Executor stopped reading query replies");
                            }
                            queries.push(checkout);
                        }
                    }
                    Some(ExecutorOutput::Status(status)) => parser.set_status(status),
                    Some(ExecutorOutput::Header { name, value }) => parser.add_header(&name, &value),
                    None => break,
                },
            }
        }

        match finished {
            Some(result) => result?,
            None => run.await?,
        }
        drop(queries);

        let outcome = parser.finish();
        debug!(
            function = %glue.function,
            status = outcome.status,
            events = outcome.events.len(),
            "Execution finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockExecutor;
    use dphp_store::MemoryBroker;
    use dphp_types::HeaderName;

    fn bridge(executor: MockExecutor) -> (Bridge, Arc<MockExecutor>) {
        let executor = Arc::new(executor);
        let state = StateStore::new(Arc::new(MemoryBroker::new()));
        (Bridge::new(executor.clone(), state, "/app/bootstrap.php"), executor)
    }

    #[test]
    fn request_marshalling() {
        let glue = Glue::new("boot.php", Method::SignalEntity, vec![Value::from(1)], "/tmp/p");
        let request = glue.request(Headers::new(), BTreeMap::new()).unwrap();
        assert_eq!(request.body, "[1]\n\n");
        assert_eq!(request.headers.get(BOOTSTRAP_HEADER), Some("boot.php"));
        assert_eq!(request.headers.get(FUNCTION_HEADER), Some("entitySignal"));
        assert_eq!(request.headers.get(PAYLOAD_HEADER), Some("/tmp/p"));
    }

    #[tokio::test]
    async fn execute_collects_outcome() {
        let (bridge, executor) = bridge(MockExecutor::new().with_output(
            Method::ProcessMessage,
            201,
            vec![
                "hello".to_string(),
                r#"EVENT~!~{"destination":"activity:x","event":"e"}"#.to_string(),
            ],
        ));
        let id = StateId::entity("Counter", "1");
        let user = User::new("bob", vec![]);
        let glue = bridge.call(Method::ProcessMessage, vec![], "/tmp/payload");
        let outcome = bridge
            .execute(
                &glue,
                Headers::new(),
                BTreeMap::new(),
                CallContext {
                    current: Some(&id),
                    principal: Some(&user),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, 201);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].subject, "activity.x");
        assert_eq!(
            outcome.events[0].headers.get(HeaderName::EmittedBy),
            Some("entity:Counter:1")
        );

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].env.get(STATE_ID_ENV).map(String::as_str), Some("entity:Counter:1"));
        assert_eq!(
            calls[0].headers.get(PROVENANCE_HEADER),
            Some(r#"{"userId":"bob","roles":[]}"#)
        );
    }

    #[tokio::test]
    async fn queries_are_answered_with_state_paths() {
        let executor = MockExecutor::new().on(Method::ProcessMessage, |_request, mut io| async move {
            io.output
                .send(ExecutorOutput::Line("QUERY~!~entity:Other:1~!~q7".to_string()))
                .await
                .ok();
            let reply = io.input.recv().await.unwrap_or_default();
            let path = reply
                .trim_end()
                .strip_prefix("q7://")
                .map(str::to_string)
                .unwrap_or_default();
            let exists = std::path::Path::new(&path).exists();
            io.output
                .send(ExecutorOutput::Line(format!("exists={exists}")))
                .await
                .ok();
            io.output
                .send(ExecutorOutput::Header {
                    name: "X-Path".to_string(),
                    value: path,
                })
                .await
                .ok();
            Ok(())
        });
        let (bridge, _) = bridge(executor);
        let glue = bridge.call(Method::ProcessMessage, vec![], "/tmp/payload");
        let outcome = bridge
            .execute(&glue, Headers::new(), BTreeMap::new(), CallContext::default())
            .await
            .unwrap();

        let path = outcome.headers.get("X-Path").unwrap().to_string();
        assert!(!path.is_empty());
        // the query checkout is released once the call returns
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn malformed_event_fails_the_call() {
        let (bridge, _) = bridge(MockExecutor::new().with_output(
            Method::ProcessMessage,
            200,
            vec!["EVENT~!~not json".to_string()],
        ));
        let glue = bridge.call(Method::ProcessMessage, vec![], "/tmp/payload");
        let result = bridge
            .execute(&glue, Headers::new(), BTreeMap::new(), CallContext::default())
            .await;
        assert!(result.is_err());
    }
}
