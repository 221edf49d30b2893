//! Session-oriented backend
//!
//! Drives one exchange against a tool-augmented agent runtime:
//! start the runtime, open a session, send one prompt, then destroy the
//! session and stop the runtime on every exit path.

use super::error::{ExchangeError, ExchangeErrorKind};
use super::lifecycle::{Lifecycle, Step};
use crate::config::{RuntimeOptions, SessionConfig, SessionSettings};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Bound on each teardown call, so a wedged runtime cannot hold the caller
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque session handle issued by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reply payload: `{data: {content}}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionReply {
    pub data: ReplyData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyData {
    pub content: String,
}

impl SessionReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            data: ReplyData {
                content: content.into(),
            },
        }
    }
}

/// One agent runtime instance. Used for exactly one exchange.
#[async_trait]
pub trait AgentRuntime: Send {
    /// Bring the runtime up
    async fn start(&mut self) -> Result<(), ExchangeError>;

    /// Open a session bound to one model, tool manifest and instruction
    async fn create_session(&mut self, config: &SessionConfig) -> Result<SessionId, ExchangeError>;

    /// Submit a prompt and wait up to `timeout` for the reply
    async fn send_and_wait(
        &mut self,
        session: &SessionId,
        prompt: &str,
        timeout: Duration,
    ) -> Result<SessionReply, ExchangeError>;

    async fn destroy_session(&mut self, session: &SessionId) -> Result<(), ExchangeError>;

    /// Release the runtime. Must be safe after a failed or interrupted `start`.
    async fn stop(&mut self) -> Result<(), ExchangeError>;
}

/// Creates a fresh runtime per exchange
pub trait RuntimeLauncher: Send + Sync {
    fn launch(&self, options: &RuntimeOptions) -> Box<dyn AgentRuntime>;
}

pub struct SessionOrientedBackend {
    launcher: Arc<dyn RuntimeLauncher>,
    settings: SessionSettings,
    timeout: Duration,
}

impl SessionOrientedBackend {
    pub fn new(
        launcher: Arc<dyn RuntimeLauncher>,
        settings: SessionSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            settings,
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.session.model
    }

    /// Run one full exchange. The overall timeout covers start, session
    /// creation and the prompt; teardown always runs afterwards.
    pub async fn answer(&self, prompt: &str) -> Result<String, ExchangeError> {
        self.settings
            .session
            .validate()
            .map_err(ExchangeError::session_creation)?;

        let deadline = Instant::now() + self.timeout;
        let mut runtime = self.launcher.launch(&self.settings.runtime);
        let mut lifecycle = Lifecycle::new();
        let mut session = None;

        let outcome = tokio::time::timeout_at(
            deadline,
            self.converse(runtime.as_mut(), &mut lifecycle, &mut session, prompt, deadline),
        )
        .await
        .unwrap_or_else(|_| Err(ExchangeError::timeout(self.timeout)));

        if lifecycle.phase().accepts_prompt() {
            lifecycle.record(match &outcome {
                Ok(_) => Step::Reply,
                Err(e) if e.kind == ExchangeErrorKind::Timeout => Step::TimeOut,
                Err(_) => Step::Fail,
            });
        }

        teardown(runtime.as_mut(), &mut lifecycle, session).await;

        outcome.and_then(|reply| {
            if reply.data.content.trim().is_empty() {
                Err(ExchangeError::malformed_response("Session reply content is empty"))
            } else {
                Ok(reply.data.content)
            }
        })
    }

    async fn converse(
        &self,
        runtime: &mut dyn AgentRuntime,
        lifecycle: &mut Lifecycle,
        session: &mut Option<SessionId>,
        prompt: &str,
        deadline: Instant,
    ) -> Result<SessionReply, ExchangeError> {
        runtime.start().await?;
        lifecycle.record(Step::Start);

        let id = runtime.create_session(&self.settings.session).await?;
        tracing::debug!(session = %id, model = %self.settings.session.model, "Session created");
        *session = Some(id.clone());
        lifecycle.record(Step::OpenSession);

        let remaining = deadline.saturating_duration_since(Instant::now());
        runtime.send_and_wait(&id, prompt, remaining).await
    }
}

/// Destroy the session if one was opened, then stop the runtime.
///
/// `stop` runs even when `start` never completed: a half-started runtime
/// may still own a process.
async fn teardown(
    runtime: &mut dyn AgentRuntime,
    lifecycle: &mut Lifecycle,
    session: Option<SessionId>,
) {
    debug_assert_eq!(lifecycle.phase().holds_session(), session.is_some());

    if let Some(id) = session {
        match tokio::time::timeout(TEARDOWN_TIMEOUT, runtime.destroy_session(&id)).await {
            Ok(Ok(())) => tracing::debug!(session = %id, "Session destroyed"),
            Ok(Err(e)) => tracing::warn!(session = %id, error = %e, "Failed to destroy session"),
            Err(_) => tracing::warn!(session = %id, "Timed out destroying session"),
        }
        lifecycle.record(Step::CloseSession);
    }

    match tokio::time::timeout(TEARDOWN_TIMEOUT, runtime.stop()).await {
        Ok(Ok(())) => tracing::debug!("Agent runtime stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to stop agent runtime"),
        Err(_) => tracing::warn!("Timed out stopping agent runtime"),
    }
    lifecycle.record(Step::Stop);
    debug_assert!(!lifecycle.phase().holds_runtime());
}
