//! HTTP request handlers

use super::types::{ErrorResponse, ExchangeRequest, ExchangeResponse, HealthResponse};
use super::AppState;
use crate::exchange::{ExchangeError, ExchangeErrorKind};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/exchange", post(run_exchange))
        .route("/api/health", get(health))
        .route("/version", get(get_version))
        .with_state(state)
}

/// Clears the busy flag on drop, however the exchange ends
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

async fn run_exchange(
    State(state): State<AppState>,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Result<Json<ExchangeResponse>, AppError> {
    let Json(req) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    if req.question.trim().is_empty() {
        return Err(AppError::BadRequest("Question must not be blank".to_string()));
    }

    let guard = BusyGuard::acquire(&state.busy).ok_or(AppError::Busy)?;

    // Run detached so a dropped client connection cannot cut teardown short
    let backend = state.backend.clone();
    let task = tokio::spawn(async move {
        let _guard = guard;
        backend.exchange(&req.question, &req.history).await
    });

    let reply = task
        .await
        .map_err(|e| AppError::Internal(format!("Exchange task failed: {e}")))?
        .map_err(AppError::Exchange)?;

    Ok(Json(ExchangeResponse {
        text: reply.text,
        elapsed_seconds: reply.elapsed_seconds,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        backend: state.backend.name().to_string(),
        model: state.backend.model().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("r2copilot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Busy,
    Exchange(ExchangeError),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new("bad_request", msg))
            }
            AppError::Busy => (
                StatusCode::CONFLICT,
                ErrorResponse::new("busy", "Another exchange is already in flight"),
            ),
            // Details are logged by the exchange; clients get the stable text
            AppError::Exchange(e) => (
                exchange_status(e.kind),
                ErrorResponse::new(e.kind.as_str(), e.user_message()),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("internal", "Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn exchange_status(kind: ExchangeErrorKind) -> StatusCode {
    match kind {
        ExchangeErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ExchangeErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ExchangeErrorKind::SessionCreation
        | ExchangeErrorKind::Transport
        | ExchangeErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
    }
}
