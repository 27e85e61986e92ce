// HTTP and WebSocket front end for the marketplace.

pub mod error;
pub mod extract;
pub mod routes;
pub mod ws_server;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use inkhub_core::Marketplace;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
pub type AppState = Arc<Marketplace>;

/// Headroom above `max_kb` for multipart boundaries and text fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the REST router. Uploaded files are served under `/storage`.
pub fn router(state: AppState) -> Router {
    let uploads = &state.config.uploads;
    let body_limit = usize::try_from(uploads.max_kb * 1024)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let storage = ServeDir::new(&uploads.dir);

    Router::new()
        .merge(routes::api())
        .nest_service("/storage", storage)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the REST API on `0.0.0.0:{port}` until `shutdown` resolves.
pub async fn serve_http<F>(port: u16, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
