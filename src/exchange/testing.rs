//! Fake agent runtime for testing
//!
//! Records every lifecycle call so tests can assert ordering and that
//! teardown matches setup.

use super::error::{ExchangeError, ExchangeErrorKind};
use super::session::{AgentRuntime, RuntimeLauncher, SessionId, SessionReply};
use crate::config::{RuntimeOptions, SessionConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleCall {
    Start,
    CreateSession(SessionConfig),
    SendAndWait { session: SessionId, prompt: String },
    DestroySession(SessionId),
    Stop,
}

impl LifecycleCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::CreateSession(_) => "create_session",
            Self::SendAndWait { .. } => "send_and_wait",
            Self::DestroySession(_) => "destroy_session",
            Self::Stop => "stop",
        }
    }
}

/// How `send_and_wait` behaves
#[derive(Debug, Clone)]
pub enum SendBehavior {
    Reply(String),
    Fail(ExchangeErrorKind),
    NeverReply,
}

/// Launches fake runtimes that share one call log
#[derive(Debug)]
pub struct FakeLauncher {
    calls: Arc<Mutex<Vec<LifecycleCall>>>,
    launched: AtomicUsize,
    sessions: Arc<AtomicUsize>,
    send: SendBehavior,
    fail_start: bool,
    fail_create: bool,
    create_delay: Option<Duration>,
}

impl FakeLauncher {
    fn with_behavior(send: SendBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            launched: AtomicUsize::new(0),
            sessions: Arc::new(AtomicUsize::new(0)),
            send,
            fail_start: false,
            fail_create: false,
            create_delay: None,
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_behavior(SendBehavior::Reply(text.into()))
    }

    pub fn never_replying() -> Self {
        Self::with_behavior(SendBehavior::NeverReply)
    }

    pub fn failing_send(kind: ExchangeErrorKind) -> Self {
        Self::with_behavior(SendBehavior::Fail(kind))
    }

    pub fn with_failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<LifecycleCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name() == name).count()
    }

    /// Number of runtimes handed out
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    /// Session ids in the order sessions were sent prompts
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LifecycleCall::SendAndWait { session, .. } => Some(session),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_ids(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LifecycleCall::DestroySession(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl RuntimeLauncher for FakeLauncher {
    fn launch(&self, _options: &RuntimeOptions) -> Box<dyn AgentRuntime> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeRuntime {
            calls: self.calls.clone(),
            sessions: self.sessions.clone(),
            send: self.send.clone(),
            fail_start: self.fail_start,
            fail_create: self.fail_create,
            create_delay: self.create_delay,
        })
    }
}

struct FakeRuntime {
    calls: Arc<Mutex<Vec<LifecycleCall>>>,
    sessions: Arc<AtomicUsize>,
    send: SendBehavior,
    fail_start: bool,
    fail_create: bool,
    create_delay: Option<Duration>,
}

impl FakeRuntime {
    fn record(&self, call: LifecycleCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AgentRuntime for FakeRuntime {
    async fn start(&mut self) -> Result<(), ExchangeError> {
        self.record(LifecycleCall::Start);
        if self.fail_start {
            return Err(ExchangeError::backend_unavailable("fake runtime refused to start"));
        }
        Ok(())
    }

    async fn create_session(&mut self, config: &SessionConfig) -> Result<SessionId, ExchangeError> {
        self.record(LifecycleCall::CreateSession(config.clone()));
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create {
            return Err(ExchangeError::session_creation("fake runtime rejected the manifest"));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionId::new(format!("fake-session-{n}")))
    }

    async fn send_and_wait(
        &mut self,
        session: &SessionId,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<SessionReply, ExchangeError> {
        self.record(LifecycleCall::SendAndWait {
            session: session.clone(),
            prompt: prompt.to_string(),
        });
        match &self.send {
            SendBehavior::Reply(text) => Ok(SessionReply::new(text.clone())),
            SendBehavior::Fail(kind) => Err(ExchangeError::new(*kind, "fake send failure")),
            SendBehavior::NeverReply => std::future::pending().await,
        }
    }

    async fn destroy_session(&mut self, session: &SessionId) -> Result<(), ExchangeError> {
        self.record(LifecycleCall::DestroySession(session.clone()));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ExchangeError> {
        self.record(LifecycleCall::Stop);
        Ok(())
    }
}
