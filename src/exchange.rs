//! Question/answer exchange
//!
//! One exchange turns a question plus transcript into a prompt, hands it to
//! the configured backend and times the round trip. The backend is chosen
//! once when the service is wired.

mod error;
mod lifecycle;
mod session;
mod stateless;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ExchangeError, ExchangeErrorKind};
pub use lifecycle::{advance, Lifecycle, LifecycleError, Phase, Step};
pub use session::{
    AgentRuntime, ReplyData, RuntimeLauncher, SessionId, SessionOrientedBackend, SessionReply,
};
pub use stateless::StatelessBackend;

use crate::config::{BackendConfig, ExchangeConfig};
use crate::prompt::{build_prompt, ConversationTurn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Answer text plus the wall-clock seconds spent in the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub elapsed_seconds: f64,
}

pub enum ExchangeBackend {
    SessionOriented(SessionOrientedBackend),
    Stateless(StatelessBackend),
}

impl ExchangeBackend {
    /// Wire the backend named by `config`. `launcher` is only used by the
    /// session-oriented variant.
    pub fn from_config(
        config: &ExchangeConfig,
        launcher: Arc<dyn RuntimeLauncher>,
    ) -> Result<Self, ExchangeError> {
        Ok(match &config.backend {
            BackendConfig::SessionOriented(settings) => Self::SessionOriented(
                SessionOrientedBackend::new(launcher, settings.clone(), config.timeout),
            ),
            BackendConfig::Stateless(settings) => {
                Self::Stateless(StatelessBackend::new(settings.clone(), config.timeout)?)
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionOriented(_) => "session-oriented",
            Self::Stateless(_) => "stateless",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::SessionOriented(backend) => backend.model(),
            Self::Stateless(backend) => backend.model(),
        }
    }

    /// Run one exchange.
    ///
    /// `history` is read only; the caller owns the transcript and appends
    /// turns itself.
    pub async fn exchange(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<Reply, ExchangeError> {
        let exchange_id = uuid::Uuid::new_v4();
        let prompt = build_prompt(question, history);

        let start = Instant::now();
        let result = match self {
            Self::SessionOriented(backend) => backend.answer(&prompt).await,
            Self::Stateless(backend) => backend.answer(&prompt).await,
        };
        let duration = start.elapsed();

        match &result {
            Ok(_) => tracing::info!(
                exchange_id = %exchange_id,
                backend = self.name(),
                model = %self.model(),
                history_len = history.len(),
                duration_ms = %duration.as_millis(),
                "Exchange completed"
            ),
            Err(e) => tracing::error!(
                exchange_id = %exchange_id,
                backend = self.name(),
                model = %self.model(),
                duration_ms = %duration.as_millis(),
                error_kind = %e.kind,
                error = %e.message,
                "Exchange failed"
            ),
        }

        result.map(|text| Reply {
            text,
            elapsed_seconds: duration.as_secs_f64(),
        })
    }
}
