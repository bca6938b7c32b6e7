//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // File registry
        .route(
            "/v1/files",
            get(handlers::list_files).post(handlers::create_file),
        )
        .route("/v1/files/{file_id}", get(handlers::get_file))
        .route("/v1/files/{file_id}/data", get(handlers::get_file_data))
        .route("/v1/check/{hash}", get(handlers::check_file_hash))
        // Chunk ingestion
        .route(
            "/v1/files/{file_id}/chunks/{position}/{hash}",
            post(handlers::upload_chunk),
        )
        // Completion notifications
        .route(
            "/v1/sessions/{token}/events",
            get(handlers::session_events),
        );

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict this endpoint to scraper addresses at the
    // network level; see crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
