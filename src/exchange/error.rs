//! Exchange error types

use std::time::Duration;
use thiserror::Error;

/// Classified failure of one exchange
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::BackendUnavailable, message)
    }

    pub fn session_creation(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::SessionCreation, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ExchangeErrorKind::Timeout,
            format!("No reply within {}s", after.as_secs_f64()),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Transport, message)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::MalformedResponse, message)
    }

    /// Text safe to show in the display surface
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Error classification. None of these are retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    /// Agent runtime could not start or the endpoint is unreachable
    BackendUnavailable,
    /// Session or tool manifest rejected by the runtime
    SessionCreation,
    /// No reply within the exchange bound
    Timeout,
    /// Connection failed mid-request or mid-session
    Transport,
    /// Backend replied without the expected answer field
    MalformedResponse,
}

impl ExchangeErrorKind {
    /// Stable machine-readable tag
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::SessionCreation => "session_creation_error",
            Self::Timeout => "exchange_timeout",
            Self::Transport => "transport_error",
            Self::MalformedResponse => "malformed_response",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "The assistant backend is not available right now.",
            Self::SessionCreation => "The assistant could not open a session with its tools.",
            Self::Timeout => "The assistant did not answer in time.",
            Self::Transport => "The connection to the assistant failed.",
            Self::MalformedResponse => "The assistant returned a reply that could not be read.",
        }
    }
}

impl std::fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
