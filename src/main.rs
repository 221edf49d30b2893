//! r2copilot server
//!
//! Serves the exchange API for the chat surfaces.

use r2copilot::api::{create_router, AppState};
use r2copilot::copilot::ProcessLauncher;
use r2copilot::{ExchangeBackend, ExchangeConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "r2copilot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = ExchangeConfig::from_env()?;
    let port: u16 = std::env::var("R2COPILOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8501);

    let backend = ExchangeBackend::from_config(&config, Arc::new(ProcessLauncher))?;
    tracing::info!(
        backend = backend.name(),
        model = %backend.model(),
        timeout_secs = config.timeout.as_secs(),
        "Exchange backend configured"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(backend))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("r2copilot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
