//! API request and response types

use crate::prompt::ConversationTurn;
use serde::{Deserialize, Serialize};

/// Request to run one exchange
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub question: String,
    /// Transcript so far, oldest first. Read only.
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

/// Answer for one exchange
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ExchangeResponse {
    pub text: String,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub backend: String,
    pub model: String,
}

/// Error body: `{"error": {"kind", "message"}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }
}
