//! HTTP API for r2copilot
//!
//! Exposes one exchange per request to a display surface. The caller owns
//! the transcript and sends it with every question.

mod handlers;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::exchange::ExchangeBackend;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<ExchangeBackend>,
    /// Set while an exchange is in flight; one at a time per service
    pub busy: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(backend: ExchangeBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }
}
