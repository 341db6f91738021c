//! HTTP front end for the docrelay supervisor.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness banner
//! - `POST /chat` - Send a message to the supervisor
//! - `GET /health` - Source reachability and agent readiness
//! - `GET /capabilities` - What each source can do
//!
//! `/chat` answers 503 until [`bootstrap`] has installed the supervisor.
//!
//! # Architecture
//!
//! ```text
//! Client
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Server    │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌─────────────────────┐
//! │   Supervisor    │ ───▶ │ Specialist per source│
//! └─────────────────┘      └─────────────────────┘
//! ```

pub mod bootstrap;
pub mod routes;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use bootstrap::{bootstrap, wait_for_endpoint};
pub use state::{AppContext, ServiceEndpoint};

/// Create the API router with all routes configured.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/chat", post(routes::chat))
        .route("/health", get(routes::health))
        .route("/capabilities", get(routes::capabilities))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(ctx);

    info!(%addr, "Starting docrelay API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
