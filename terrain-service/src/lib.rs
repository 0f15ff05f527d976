//! Terrain Service Library
//!
//! HTTP handlers, router and settings for the elevation service.
//! This library is used by both the terrain-service binary and integration tests.

pub mod config;
pub mod handlers;

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use terrain::ElevationService;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Application state shared across handlers.
pub struct AppState {
    /// Elevation resolver; all of its calls block.
    pub elevation_service: ElevationService,
}

/// Build the HTTP router.
///
/// Request bodies larger than `max_post_bytes` are rejected with
/// `413 Payload Too Large`.
pub fn router(state: Arc<AppState>, max_post_bytes: usize) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::get_elevation).post(handlers::post_elevations),
        )
        .route("/status", get(handlers::get_status))
        .route("/stats", get(handlers::get_stats))
        .layer(DefaultBodyLimit::max(max_post_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use config::ServerConfig;
pub use handlers::{ElevationQuery, ErrorResponse, StatsResponse, ZoomQuery};
