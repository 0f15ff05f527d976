//! Terrain Service - HTTP microservice for elevation queries.
//!
//! Tiles are downloaded on first use into the cache directory and held
//! decoded in memory; see [`terrain::ElevationServiceBuilder::from_env`] for
//! the tile cache variables and [`terrain_service::config`] for the server
//! ones. Logging is controlled with `RUST_LOG` (default `info`).
//!
//! ## Endpoints
//!
//! - `GET /?lat=X&lng=Y[&zoom=Z]` - Elevation at one coordinate
//! - `POST /[?zoom=Z]` - Elevations for a JSON array of `[lat, lng]` pairs
//! - `GET /status` - Liveness check
//! - `GET /stats` - Cache and download statistics

use std::net::SocketAddr;
use std::sync::Arc;

use terrain::{ElevationService, ElevationServiceBuilder};
use terrain_service::{router, AppState, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terrain=info,terrain_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // The blocking HTTP client must be created and dropped outside the runtime.
    let elevation_service = ElevationServiceBuilder::from_env()?.build()?;

    tracing::info!(
        cache_dir = %elevation_service.cache_dir().display(),
        cache_capacity = elevation_service.cache_capacity(),
        default_zoom = elevation_service.default_zoom(),
        can_download = elevation_service.can_download(),
        port = config.port,
        "Starting terrain service"
    );

    prefetch(&elevation_service, &config);

    let state = Arc::new(AppState { elevation_service });

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(Arc::clone(&state), &config))?;
    drop(runtime);

    Ok(())
}

async fn serve(state: Arc<AppState>, config: &ServerConfig) -> std::io::Result<()> {
    let app = router(state, config.max_post_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await
}

/// Download the `TERRAIN_PREFETCH` regions before serving.
fn prefetch(service: &ElevationService, config: &ServerConfig) {
    let zoom = config.prefetch_zoom.unwrap_or(service.default_zoom());

    for bounds in &config.prefetch {
        tracing::info!(?bounds, zoom, "Prefetching tiles");
        match service.prefetch(bounds, zoom) {
            Ok(stats) => tracing::info!(
                tiles_matched = stats.tiles_matched,
                tiles_downloaded = stats.tiles_downloaded,
                tiles_already_cached = stats.tiles_already_cached,
                tiles_failed = stats.tiles_failed,
                elapsed_ms = stats.elapsed_ms,
                "Prefetch complete"
            ),
            Err(e) => tracing::warn!(?bounds, error = %e, "Prefetch skipped"),
        }
    }
}
