//! # optx-server: HTTP Service for Plan Estimation
//!
//! This binary crate exposes the optx statistics and cost estimation core as a
//! network service. A planner sends a plan together with the statistics of the
//! tables it reads, and receives output statistics and CPU/memory/network costs
//! for the plan and for every node in it.
//!
//! ## Architecture
//!
//! ```text
//! Planner
//!   |
//!   | HTTP POST /estimate (plan + table statistics, JSON)
//!   v
//! optx-server (this binary)
//!   |
//!   +-> catalog from the request's table statistics
//!   +-> memo from the plan (one group per node)
//!   +-> memo-backed lookup: stats + cumulative cost, cached per node
//!   |
//!   | HTTP response (estimates, JSON)
//!   v
//! Planner
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`    - Health check
//! - `GET  /cluster`   - Current active worker count
//! - `POST /cluster`   - Replace the active worker count
//! - `POST /estimate`  - Estimate statistics and costs of a plan
//!
//! ## Configuration
//!
//! The server listens on `0.0.0.0:3000` by default (`OPTX_LISTEN_ADDR`) and starts
//! with a single worker (`OPTX_CLUSTER_WIDTH`). Logging is controlled by the
//! `RUST_LOG` environment variable (defaults to `optx=debug`).

mod routes;
mod state;

use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("optx=debug")),
        )
        .init();

    let config = state::ServerConfig::from_env();
    let addr = config.listen_addr.clone();
    let state = Arc::new(state::AppState::new(config));

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("optx-server listening on http://{}", addr);
    axum::serve(listener, app).await
}
