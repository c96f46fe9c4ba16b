//! Admin API.
//!
//! Bearer-authenticated routes for inspecting and steering the pipeline:
//!
//! ```text
//! GET  /admin/status                    version + resilience snapshot
//! POST /admin/circuits/{target}/open    force a circuit open
//! POST /admin/circuits/{target}/reset   close a circuit
//! POST /admin/bottleneck/reset-stats    zero admission counters
//! ```

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::invoker::ResilientInvoker;

pub fn setup_admin_router(invoker: Arc<ResilientInvoker>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits/{target}/open", post(force_open))
        .route("/admin/circuits/{target}/reset", post(reset_circuit))
        .route("/admin/bottleneck/reset-stats", post(reset_stats))
        .layer(middleware::from_fn_with_state(
            invoker.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(invoker)
}

/// Serve the admin API until a shutdown signal arrives.
pub async fn serve(
    invoker: Arc<ResilientInvoker>,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    axum::serve(listener, setup_admin_router(invoker))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
