pub mod poller;
pub mod routes;
pub mod state;

pub use poller::{spawn_feed, FeedMode};
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the board feed and serve the API until Ctrl-C.
pub async fn start_server(
    state: Arc<AppState>,
    bind_addr: &str,
    mode: FeedMode,
    interval: Duration,
) -> anyhow::Result<()> {
    let feed = spawn_feed(Arc::clone(&state), mode, interval);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("API server listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed.abort();
    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
