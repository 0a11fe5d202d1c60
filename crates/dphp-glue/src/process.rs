//! Executor running the script runtime as a child process.
//!
//! The request body goes to the child's stdin, followed by query replies.
//! Request headers are exported as `HTTP_<NAME>` variables. Stdout is read
//! line by line; `STATUS~!~<code>` and `HEADER~!~<name>~!~<value>` lines
//! carry the response status and headers. Stderr is logged.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GlueError, GlueResult};
use crate::executor::{ExecutionRequest, Executor, ExecutorIo, ExecutorOutput};
use crate::protocol::{HEADER_PREFIX, SEPARATOR, STATUS_PREFIX};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessExecutor {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Script the runtime is pointed at; appended to `args`.
    pub router: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            router: None,
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(router) = &self.router {
            command.arg(router);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (name, value) in &request.env {
            command.env(name, value);
        }
        for (name, value) in request.headers.iter() {
            command.env(header_env_name(name), value);
        }
        command
    }
}

/// `Event-Type` -> `HTTP_EVENT_TYPE`.
pub fn header_env_name(name: &str) -> String {
    let mut env = String::with_capacity(name.len() + 5);
    env.push_str("HTTP_");
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            env.push(c.to_ascii_uppercase());
        } else {
            env.push('_');
        }
    }
    env
}

/// Read one line, replacing invalid UTF-8. `None` at end of stream.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Classify a stdout line.
pub fn classify_line(line: String) -> ExecutorOutput {
    if let Some(code) = line.strip_prefix(STATUS_PREFIX) {
        if let Ok(status) = code.trim().parse() {
            return ExecutorOutput::Status(status);
        }
    }
    if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
        if let Some((name, value)) = header.split_once(SEPARATOR) {
            return ExecutorOutput::Header {
                name: name.to_string(),
                value: value.to_string(),
            };
        }
    }
    ExecutorOutput::Line(line)
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: ExecutionRequest, io: ExecutorIo) -> GlueResult<()> {
        let ExecutorIo { output, mut input } = io;
        let mut child = self.command(&request).spawn().map_err(|e| GlueError::Spawn {
            program: self.program.display().to_string(),
            reason: e.to_string(),
        })?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(GlueError::Spawn {
                program: self.program.display().to_string(),
                reason: "child stdio was not captured".to_string(),
            });
        };

        let function = request.function;
        let body = request.body;
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(body.as_bytes()).await {
                debug!(error = %e, "Executor closed stdin before reading the request body");
                return;
            }
            while let Some(reply) = input.recv().await {
                if stdin.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let errors = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf).await {
                warn!(target: "dphp::executor", function = %function, "{}", line);
            }
        });

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = read_line_lossy(&mut reader, &mut buf).await? {
            if output.send(classify_line(line)).await.is_err() {
                break;
            }
        }

        let status = child.wait().await?;
        writer.abort();
        if let Err(e) = errors.await {
            debug!(error = %e, "stderr reader ended abnormally");
        }

        if status.success() {
            Ok(())
        } else {
            Err(GlueError::executor_failure(
                500,
                format!("{} exited with {}", self.program.display(), status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_become_env_vars() {
        assert_eq!(header_env_name("DPHP_PROVENANCE"), "HTTP_DPHP_PROVENANCE");
        assert_eq!(header_env_name("Event-Type"), "HTTP_EVENT_TYPE");
    }

    #[test]
    fn status_and_header_lines() {
        assert_eq!(
            classify_line("STATUS~!~404".to_string()),
            ExecutorOutput::Status(404)
        );
        assert_eq!(
            classify_line("HEADER~!~Permissions~!~{\"mode\":\"anon\"}".to_string()),
            ExecutorOutput::Header {
                name: "Permissions".to_string(),
                value: "{\"mode\":\"anon\"}".to_string(),
            }
        );
        assert_eq!(
            classify_line("STATUS~!~abc".to_string()),
            ExecutorOutput::Line("STATUS~!~abc".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_a_shell_script() {
        use crate::bridge::{Bridge, CallContext};
        use crate::method::Method;
        use dphp_state::StateStore;
        use dphp_store::MemoryBroker;
        use dphp_types::Headers;
        use std::collections::BTreeMap;
        use std::sync::Arc;

        let script = r#"read -r input
echo "input=$input function=$HTTP_DPHP_FUNCTION"
echo 'STATUS~!~202'
echo 'HEADER~!~X-Done~!~yes'
echo 'EVENT~!~{"destination":"activity:next","event":"go"}'
"#;
        let executor = ProcessExecutor::new("sh").with_args(vec!["-c".to_string(), script.to_string()]);
        let bridge = Bridge::new(
            Arc::new(executor),
            StateStore::new(Arc::new(MemoryBroker::new())),
            "bootstrap.php",
        );
        let glue = bridge.call(Method::ProcessMessage, vec![], "/tmp/payload");
        let outcome = bridge
            .execute(&glue, Headers::new(), BTreeMap::new(), CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, 202);
        assert_eq!(outcome.headers.get("X-Done"), Some("yes"));
        assert_eq!(outcome.events.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_is_an_executor_failure() {
        let executor = ProcessExecutor::new("sh").with_args(vec!["-c".to_string(), "exit 3".to_string()]);
        let (output, _rx) = tokio::sync::mpsc::channel(8);
        let (_tx, input) = tokio::sync::mpsc::channel(8);
        let request = ExecutionRequest {
            function: crate::method::Method::ProcessMessage,
            headers: Default::default(),
            env: Default::default(),
            body: "[]\n\n".to_string(),
            payload: "/tmp/payload".into(),
        };
        let err = executor
            .execute(request, ExecutorIo { output, input })
            .await
            .unwrap_err();
        assert!(matches!(err, GlueError::ExecutorFailure { status: 500, .. }));
    }

    fn request(body: String) -> ExecutionRequest {
        ExecutionRequest {
            function: crate::method::Method::ProcessMessage,
            headers: Default::default(),
            env: Default::default(),
            body,
            payload: "/tmp/payload".into(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_is_logged_not_fatal() {
        let executor = ProcessExecutor::new("sh").with_args(vec![
            "-c".to_string(),
            r"printf 'caf\351\n'; echo 'STATUS~!~201'".to_string(),
        ]);
        let (output, mut rx) = tokio::sync::mpsc::channel(8);
        let (_tx, input) = tokio::sync::mpsc::channel(8);
        executor
            .execute(request("[]\n\n".to_string()), ExecutorIo { output, input })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line);
        }
        assert_eq!(
            seen,
            vec![
                ExecutorOutput::Line("caf\u{FFFD}".to_string()),
                ExecutorOutput::Status(201),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_body_and_output_do_not_block() {
        let executor = ProcessExecutor::new("sh").with_args(vec![
            "-c".to_string(),
            "seq 1 20000; cat > /dev/null; echo done".to_string(),
        ]);
        let (output, mut rx) = tokio::sync::mpsc::channel(8);
        let (replies, input) = tokio::sync::mpsc::channel(8);
        drop(replies);
        let lines = tokio::spawn(async move {
            let mut count = 0;
            let mut last = None;
            while let Some(line) = rx.recv().await {
                count += 1;
                last = Some(line);
            }
            (count, last)
        });

        let body = "x".repeat(1 << 20);
        tokio::time::timeout(
            std::time::Duration::from_secs(10),
            executor.execute(request(body), ExecutorIo { output, input }),
        )
        .await
        .expect("executor deadlocked")
        .unwrap();

        let (count, last) = lines.await.unwrap();
        assert_eq!(count, 20001);
        assert_eq!(last, Some(ExecutorOutput::Line("done".to_string())));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let executor = ProcessExecutor::new("/definitely/not/a/program");
        let (output, _rx) = tokio::sync::mpsc::channel(8);
        let (_tx, input) = tokio::sync::mpsc::channel(8);
        let request = ExecutionRequest {
            function: crate::method::Method::ProcessMessage,
            headers: Default::default(),
            env: Default::default(),
            body: String::new(),
            payload: "/tmp/payload".into(),
        };
        let err = executor
            .execute(request, ExecutorIo { output, input })
            .await
            .unwrap_err();
        assert!(matches!(err, GlueError::Spawn { .. }));
    }
}
