//! [`QueryExecutor`] backed by the agent CLI in stream-JSON mode.
//!
//! Each query spawns one process:
//! - the session directive becomes `--resume` / `--continue` /
//!   `--session-id` (plus `--fork-session` for native forks);
//! - stdout is framed with [`NdjsonCodec`] and every line is mapped to
//!   [`ExecutorMessage`]s by [`parse_stream_line`];
//! - the process is killed when the invocation's cancellation token fires, or
//!   when the consumer drops the stream.
//!
//! The CLI cannot call back into a [`ToolPermissionGate`](super::ToolPermissionGate)
//! mid-process, so tool permissions are governed by `--permission-mode` and
//! `invocation.permissions` is ignored here.

use std::process::Stdio;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info_span, warn, Instrument};

use super::codec::NdjsonCodec;
use super::{ExecutorMessage, MessageStream, QueryExecutor, QueryInvocation, ResultMessage};
use crate::config::ExecutorConfig;
use crate::errors::{AgentError, AgentErrorKind, AgentResult};
use crate::models::query::SessionDirective;
use crate::{AppError, Result};

/// Executor that drives the agent CLI as a child process.
#[derive(Debug, Clone)]
pub struct CliExecutor {
    config: ExecutorConfig,
}

impl CliExecutor {
    /// Create an executor using `config`.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for `invocation`, prompt last.
    #[must_use]
    pub fn build_args(&self, invocation: &QueryInvocation) -> Vec<String> {
        let options = &invocation.options;
        let mut args = self.config.host_cli_args.clone();
        args.extend(
            ["-p", "--output-format", "stream-json", "--verbose"]
                .into_iter()
                .map(str::to_owned),
        );

        if options.streaming && self.config.include_partial_messages {
            args.push("--include-partial-messages".into());
        }

        match options.directive {
            Some(SessionDirective::Resume {
                ref session_id,
                fork,
            }) => {
                args.push("--resume".into());
                args.push(session_id.clone());
                if fork {
                    args.push("--fork-session".into());
                }
            }
            Some(SessionDirective::ContinueLatest) => args.push("--continue".into()),
            Some(SessionDirective::CreateWithId { ref session_id }) => {
                args.push("--session-id".into());
                args.push(session_id.clone());
            }
            None => {}
        }

        if let Some(mode) = options.permission_mode {
            args.push("--permission-mode".into());
            args.push(mode.as_str().into());
        }

        if let Some(ref system_prompt) = options.system_prompt {
            args.push("--append-system-prompt".into());
            args.push(system_prompt.clone());
        }

        args.push(invocation.prompt.clone());
        args
    }
}

impl QueryExecutor for CliExecutor {
    fn query(&self, invocation: QueryInvocation) -> MessageStream {
        let (tx, rx) = mpsc::channel::<AgentResult<ExecutorMessage>>(64);
        let args = self.build_args(&invocation);
        let host_cli = self.config.host_cli.clone();
        let span = info_span!(
            "cli_query",
            host_cli = %host_cli,
            cwd = %invocation.options.cwd.display(),
        );

        tokio::spawn(run_process(host_cli, args, invocation, tx).instrument(span));

        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}

/// Spawn the CLI and forward parsed messages until EOF, cancellation, or the
/// consumer going away.
async fn run_process(
    host_cli: String,
    args: Vec<String>,
    invocation: QueryInvocation,
    tx: mpsc::Sender<AgentResult<ExecutorMessage>>,
) {
    let mut cmd = Command::new(&host_cli);
    cmd.args(&args)
        .current_dir(&invocation.options.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = tx
                .send(Err(AgentError::new(
                    AgentErrorKind::ProcessSpawnFailed,
                    format!("failed to spawn {host_cli}"),
                )
                .with_cause(err)))
                .await;
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(Err(AgentError::new(
                AgentErrorKind::ProcessSpawnFailed,
                "agent process has no stdout",
            )))
            .await;
        return;
    };

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());
    let mut saw_result = false;

    loop {
        tokio::select! {
            biased;

            () = invocation.cancel.cancelled() => {
                debug!("query cancelled, killing agent process");
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill agent process");
                }
                let _ = tx
                    .send(Err(AgentError::new(AgentErrorKind::ProcessKilled, "query aborted")))
                    .await;
                return;
            }

            item = framed.next() => {
                match item {
                    None => break,
                    Some(Err(AppError::Serialization(msg))) => {
                        warn!(error = msg.as_str(), "framing error on agent output, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(%err, "agent output stream failed");
                        let _ = tx
                            .send(Err(AgentError::unknown("agent output stream failed").with_cause(err)))
                            .await;
                        return;
                    }
                    Some(Ok(line)) => match parse_stream_line(&line) {
                        Ok(messages) => {
                            for message in messages {
                                saw_result |= matches!(message, ExecutorMessage::Result(_));
                                if tx.send(Ok(message)).await.is_err() {
                                    debug!("stream consumer dropped, killing agent process");
                                    if let Err(err) = child.kill().await {
                                        debug!(%err, "failed to kill agent process");
                                    }
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            warn!(%err, raw_line = %line, "unparseable agent output line, skipping");
                        }
                    },
                }
            }
        }
    }

    let status = child.wait().await;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if saw_result {
        return;
    }

    match status {
        Ok(status) if !status.success() => {
            let mut err = AgentError::new(
                AgentErrorKind::GenerationFailed,
                format!("agent process exited with {status}"),
            );
            if !stderr.trim().is_empty() {
                err = err.with_cause(stderr.trim());
            }
            let _ = tx.send(Err(err)).await;
        }
        Ok(_) => {}
        Err(err) => {
            let _ = tx
                .send(Err(AgentError::new(
                    AgentErrorKind::ProcessKilled,
                    "failed to wait for agent process",
                )
                .with_cause(err)))
                .await;
        }
    }
}

/// Parse one stream-JSON line into zero or more [`ExecutorMessage`]s.
///
/// # Return value
///
/// - empty vector for blank lines and unknown message types;
/// - one message for `system`, `stream_event` and `result` lines;
/// - an `Assistant` message followed by one `ToolUse` per `tool_use` block.
///
/// # Errors
///
/// Returns `AppError::Serialization` if the line is not valid JSON or a
/// `result` line does not match [`ResultMessage`].
pub fn parse_stream_line(line: &str) -> Result<Vec<ExecutorMessage>> {
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|err| AppError::Serialization(format!("malformed json: {err}")))?;

    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "system" => Ok(value
            .get("session_id")
            .and_then(Value::as_str)
            .map(|id| ExecutorMessage::System {
                session_id: id.to_owned(),
            })
            .into_iter()
            .collect()),
        "stream_event" => {
            let event = value.get("event").cloned().unwrap_or(Value::Null);
            let text = event
                .get("delta")
                .filter(|delta| delta.get("type").and_then(Value::as_str) == Some("text_delta"))
                .and_then(|delta| delta.get("text"))
                .and_then(Value::as_str);
            match text {
                Some(text) => Ok(vec![ExecutorMessage::TextDelta(text.to_owned())]),
                None => Ok(vec![ExecutorMessage::Structured(event)]),
            }
        }
        "assistant" => {
            let content = value
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let tool_uses: Vec<ExecutorMessage> = content
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
                .map(|block| ExecutorMessage::ToolUse {
                    id: string_field(block, "id"),
                    name: string_field(block, "name"),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                })
                .collect();
            let mut messages = vec![ExecutorMessage::Assistant { content }];
            messages.extend(tool_uses);
            Ok(messages)
        }
        "result" => {
            let result: ResultMessage = serde_json::from_value(value)
                .map_err(|err| AppError::Serialization(format!("invalid result message: {err}")))?;
            Ok(vec![ExecutorMessage::Result(result)])
        }
        other => {
            debug!(kind = other, "skipping agent output message");
            Ok(Vec::new())
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
