//! Router construction and the serve loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use shoal_core::{LifecycleController, TransferRegistry};
use tower_http::cors::CorsLayer;

use crate::error::WebError;
use crate::handlers::{
    add_magnet, delete_transfer, get_transfer, list_transfers, playlist, start_file,
    start_transfer, stop_file, stop_transfer, stream_file,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TransferRegistry>,
    pub controller: LifecycleController,
    /// Port used for playlist URLs when a request carries no `Host`
    pub http_port: u16,
}

impl AppState {
    pub fn new(registry: Arc<TransferRegistry>, http_port: u16) -> Self {
        Self {
            controller: LifecycleController::new(Arc::clone(&registry)),
            registry,
            http_port,
        }
    }
}

/// Builds the API router with permissive CORS.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/torrents", get(list_transfers))
        .route("/torrents/magnet", post(add_magnet))
        .route(
            "/torrents/{hash}",
            get(get_transfer).delete(delete_transfer),
        )
        .route("/torrents/{hash}/start", post(start_transfer))
        .route("/torrents/{hash}/stop", post(stop_transfer))
        .route("/torrents/{hash}/files/start", post(start_file))
        .route("/torrents/{hash}/files/stop", post(stop_file))
        .route("/torrents/{hash}/.m3u", get(playlist))
        .route("/torrents/{hash}/stream/{index}", get(stream_file));

    Router::new()
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until `shutdown` resolves.
///
/// # Errors
/// - `WebError::Bind` - Address already in use or not permitted
/// - `WebError::Serve` - Listener failed while serving
pub async fn run_server<F>(state: AppState, address: SocketAddr, shutdown: F) -> Result<(), WebError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| WebError::Bind { address, source })?;

    tracing::info!("Shoal API listening on http://{}/api/v1", address);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(WebError::Serve)?;

    tracing::info!("Shoal API stopped");
    Ok(())
}
