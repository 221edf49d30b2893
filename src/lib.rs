//! r2copilot - conversational front-end for a reverse-engineering assistant
//!
//! Relays a question and the conversation transcript either to a
//! tool-augmented agent runtime (one session per exchange) or to a local
//! stateless inference endpoint.

pub mod api;
pub mod config;
pub mod copilot;
pub mod exchange;
pub mod prompt;

pub use config::{ConfigError, ExchangeConfig};
pub use exchange::{ExchangeBackend, ExchangeError, ExchangeErrorKind, Reply};
pub use prompt::{build_prompt, ConversationTurn, Role};
