//! Servers exposing the conversation tools.
//!
//! - HTTP (axum): health, tool catalog, tool calls and status
//! - stdio: newline-delimited JSON-RPC for local tool clients

pub mod routes;
pub mod state;
pub mod stdio;

pub use routes::create_router;
pub use state::AppState;
pub use stdio::StdioServer;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::mirror::core::config::ServerConfig;

/// Tool routes wrapped in permissive CORS and request tracing.
pub fn http_app(state: Arc<AppState>) -> Router {
    create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener configured in `config`.
///
/// # Errors
/// Returns an error if the address is unavailable.
pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.socket_addr()).await
}

/// Serve the tools on `listener` until `shutdown` completes.
///
/// In-flight requests finish before this returns.
///
/// # Errors
/// Returns an error if accepting connections fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "FastIntercom server listening");
    axum::serve(listener, http_app(state))
        .with_graceful_shutdown(shutdown)
        .await
}
