//! # optx-server: Plan-Space Explanation Service
//!
//! Exposes the Cascades search and plan-space enumeration over HTTP. A client sends
//! a join graph; the server searches it to closure and reports how many plans exist,
//! which plan sits at a given rank, or a uniform sample of plans.
//!
//! ```text
//! client
//!   |
//!   | HTTP POST /plans/{count,unrank,sample} (join-graph JSON)
//!   v
//! optx-server (this binary)
//!   |
//!   +-> left-deep memo from the join graph
//!   +-> scheduler: explore + implement to closure (blocking pool)
//!   +-> plan space: count / unrank / sample
//!   |
//!   | HTTP response (plan trees as JSON)
//!   v
//! client
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`         - Health check
//! - `GET  /rules`          - Registered rules with their stable ids
//! - `POST /plans/count`    - Number of physical and logical plans
//! - `POST /plans/unrank`   - Plans at the given ranks
//! - `POST /plans/sample`   - Uniformly sampled plans
//!
//! ## Configuration
//!
//! `OPTX_CONFIG` names an optional TOML file (see [`state::ServerConfig`]);
//! `OPTX_BIND` overrides the listen address, `0.0.0.0:3000` by default. Logging is
//! controlled by `RUST_LOG` and defaults to `optx=debug`.

mod plans;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::state::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("optx=debug".parse()?))
        .init();

    let config = ServerConfig::load()?;
    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config)?);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("optx-server listening on http://{bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/plans/count", post(plans::count_plans))
        .route("/plans/unrank", post(plans::unrank_plans))
        .route("/plans/sample", post(plans::sample_plans))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
