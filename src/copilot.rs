//! Copilot CLI agent runtime
//!
//! Runs the CLI in server mode (`--server --stdio`) as a child process and
//! talks JSON-RPC to it. Each runtime owns one child; the child is killed
//! when the runtime is stopped or dropped.

mod rpc;

pub use rpc::{read_frame, write_frame, Notification, RpcConnection, RpcError};

use crate::config::{RuntimeOptions, SessionConfig};
use crate::exchange::{AgentRuntime, ExchangeError, RuntimeLauncher, SessionId, SessionReply};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// How long a freshly spawned CLI gets to answer `ping`
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the CLI to exit after its stdin closes
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Launches one CLI process per exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl RuntimeLauncher for ProcessLauncher {
    fn launch(&self, options: &RuntimeOptions) -> Box<dyn AgentRuntime> {
        Box::new(CopilotRuntime::new(options.clone()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResult {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEventParams {
    session_id: SessionId,
    event: SessionEvent,
}

#[derive(Debug, Deserialize)]
struct SessionEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub struct CopilotRuntime {
    options: RuntimeOptions,
    child: Option<Child>,
    connection: Option<RpcConnection>,
}

impl CopilotRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            options,
            child: None,
            connection: None,
        }
    }

    /// Runtime already wired to `connection`, optionally owning `child`
    #[cfg(test)]
    fn with_connection(options: RuntimeOptions, connection: RpcConnection, child: Option<Child>) -> Self {
        Self {
            options,
            child,
            connection: Some(connection),
        }
    }

    fn spawn(&self) -> Result<Child, ExchangeError> {
        let cli = &self.options.cli_path;
        let mut cmd = Command::new(cli);
        cmd.args(["--server", "--log-level", &self.options.log_level, "--stdio"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            ExchangeError::backend_unavailable(format!(
                "Failed to launch agent runtime {}: {e}",
                cli.display()
            ))
        })
    }

    /// Connection to a live runtime, starting it first when allowed
    async fn live_connection(&mut self) -> Result<&mut RpcConnection, ExchangeError> {
        if self.connection.is_none() {
            if !self.options.auto_start {
                return Err(ExchangeError::backend_unavailable("Agent runtime is not started"));
            }
            self.start().await?;
        }

        let exited = self
            .child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten());
        if let Some(status) = exited {
            if !self.options.auto_restart {
                return Err(ExchangeError::transport(format!(
                    "Agent runtime exited ({status})"
                )));
            }
            // Sessions held by the old process are gone
            tracing::warn!(%status, "Agent runtime exited, relaunching");
            self.connection = None;
            self.child = None;
            self.start().await?;
        }

        self.connection
            .as_mut()
            .ok_or_else(|| ExchangeError::backend_unavailable("Agent runtime is not started"))
    }
}

#[async_trait]
impl AgentRuntime for CopilotRuntime {
    async fn start(&mut self) -> Result<(), ExchangeError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let mut child = self.spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ExchangeError::backend_unavailable(
                "Agent runtime started without stdio pipes",
            ));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "r2copilot::copilot::stderr", "{line}");
                }
            });
        }
        tracing::info!(pid = ?child.id(), cli = %self.options.cli_path.display(), "Agent runtime launched");

        let connection = RpcConnection::new(stdout, stdin);
        self.child = Some(child);

        let pong = tokio::time::timeout(
            STARTUP_TIMEOUT,
            connection.request("ping", json!({"message": "r2copilot"})),
        )
        .await;
        match pong {
            Ok(Ok(_)) => {
                self.connection = Some(connection);
                Ok(())
            }
            Ok(Err(e)) => Err(ExchangeError::backend_unavailable(format!(
                "Agent runtime did not answer ping: {e}"
            ))),
            Err(_) => Err(ExchangeError::backend_unavailable(format!(
                "Agent runtime did not answer ping within {}s",
                STARTUP_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn create_session(&mut self, config: &SessionConfig) -> Result<SessionId, ExchangeError> {
        let params = serde_json::to_value(config)
            .map_err(|e| ExchangeError::session_creation(format!("Unserializable session: {e}")))?;
        let connection = self.live_connection().await?;

        let result = connection
            .request("session.create", params)
            .await
            .map_err(|e| match e {
                RpcError::Remote { message, .. } => {
                    ExchangeError::session_creation(format!("Session rejected: {message}"))
                }
                other => ExchangeError::transport(format!("session.create failed: {other}")),
            })?;

        let created: CreateSessionResult = serde_json::from_value(result).map_err(|e| {
            ExchangeError::session_creation(format!("Session created without an id: {e}"))
        })?;
        Ok(created.session_id)
    }

    async fn send_and_wait(
        &mut self,
        session: &SessionId,
        prompt: &str,
        timeout: Duration,
    ) -> Result<SessionReply, ExchangeError> {
        let deadline = Instant::now() + timeout;
        let connection = self.live_connection().await?;

        let sent = tokio::time::timeout_at(
            deadline,
            connection.request(
                "session.send",
                json!({"sessionId": session.as_str(), "prompt": prompt}),
            ),
        )
        .await
        .map_err(|_| ExchangeError::timeout(timeout))?;
        sent.map_err(|e| ExchangeError::transport(format!("session.send failed: {e}")))?;

        let mut last_message = None;
        loop {
            let notification = tokio::time::timeout_at(deadline, connection.next_notification())
                .await
                .map_err(|_| ExchangeError::timeout(timeout))?
                .ok_or_else(|| ExchangeError::transport("Agent runtime closed its event stream"))?;

            if notification.method != "session.event" {
                tracing::trace!(method = %notification.method, "Ignoring notification");
                continue;
            }
            let params: SessionEventParams = match serde_json::from_value(notification.params) {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable session event");
                    continue;
                }
            };
            if &params.session_id != session {
                continue;
            }

            match params.event.kind.as_str() {
                "assistant.message" => {
                    last_message = params
                        .event
                        .data
                        .get("content")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                "session.idle" => break,
                "session.error" => {
                    let message = params
                        .event
                        .data
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown session error");
                    return Err(ExchangeError::transport(format!("Session failed: {message}")));
                }
                other => tracing::trace!(event = other, "Session event"),
            }
        }

        last_message.map(SessionReply::new).ok_or_else(|| {
            ExchangeError::malformed_response("Session went idle without an assistant message")
        })
    }

    async fn destroy_session(&mut self, session: &SessionId) -> Result<(), ExchangeError> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(ExchangeError::transport("Agent runtime is not running"));
        };
        connection
            .request("session.destroy", json!({"sessionId": session.as_str()}))
            .await
            .map(|_| ())
            .map_err(|e| ExchangeError::transport(format!("session.destroy failed: {e}")))
    }

    async fn stop(&mut self) -> Result<(), ExchangeError> {
        // Closing stdin asks the CLI to exit
        self.connection = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "Agent runtime exited");
                Ok(())
            }
            Ok(Err(e)) => Err(ExchangeError::transport(format!(
                "Failed to reap agent runtime: {e}"
            ))),
            Err(_) => {
                tracing::debug!("Agent runtime ignored stdin close, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| ExchangeError::transport(format!("Failed to kill agent runtime: {e}")))
            }
        }
    }
}
