//! osfleet server: the osquery TLS remote API and the operator campaign
//! API over one shared set of fleet services.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod logs;
pub mod osquery_config;
pub mod reaper;
pub mod state;
pub mod wire;

pub use error::ApiError;
pub use state::AppState;

use handlers::{operator, osquery};

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let max_body = state.config.server.max_body_bytes;

    let osquery_api = Router::new()
        .route("/enroll", post(osquery::enroll))
        .route("/config", post(osquery::config))
        .route("/distributed/read", post(osquery::distributed_read))
        .route("/distributed/write", post(osquery::distributed_write))
        .route("/log", post(osquery::log));

    let fleet_api = Router::new()
        .route("/queries/run", post(operator::run_query))
        .route("/targets", post(operator::preview_targets))
        .route("/campaigns/:id/close", post(operator::close_campaign))
        .route("/results/:id", get(operator::campaign_results))
        .route("/health", get(operator::health));

    Router::new()
        .route("/health", get(operator::health))
        .nest("/api/v1/osquery", osquery_api)
        .nest("/api/v1/fleet", fleet_api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestDecompressionLayer::new())
                .layer(DefaultBodyLimit::max(max_body)),
        )
}
