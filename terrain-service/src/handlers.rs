//! HTTP request handlers for the elevation service.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use terrain::{ElevationService, GeoPoint, TerrainError};

use crate::AppState;

const INVALID_QUERY: &str =
    "Invalid query. Expected float numbers as query parameters: ?lat=12.3&lng=45.6";
const INVALID_PAYLOAD: &str =
    "Invalid payload. Expected a JSON array with latitude-longitude pairs: [[lat, lng], ...]";

/// Query parameters for the single-point endpoint.
#[derive(Debug, Deserialize)]
pub struct ElevationQuery {
    /// Latitude in decimal degrees (-90 to 90).
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180).
    pub lng: f64,
    /// Tile zoom level. Defaults to the service's default zoom.
    #[serde(default)]
    pub zoom: Option<u8>,
}

/// Optional zoom for the batch endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ZoomQuery {
    #[serde(default)]
    pub zoom: Option<u8>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Cache and download statistics response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Number of decoded tiles held in memory.
    pub open_tiles: u64,
    /// Maximum number of decoded tiles.
    pub capacity: usize,
    /// Cache hit count.
    pub cache_hits: u64,
    /// Cache miss count.
    pub cache_misses: u64,
    /// Tiles evicted from memory.
    pub evictions: u64,
    /// Cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
    /// Tiles downloaded since startup.
    pub tiles_downloaded: u64,
    /// Bytes downloaded since startup.
    pub bytes_downloaded: u64,
}

/// Get elevation for one coordinate.
///
/// # Query Parameters
///
/// - `lat`: Latitude in decimal degrees (-90 to 90)
/// - `lng`: Longitude in decimal degrees (-180 to 180)
/// - `zoom`: Optional tile zoom level
///
/// # Returns
///
/// - `200 OK` with the elevation as a bare JSON number
/// - `400 Bad Request` if parameters are missing or out of range
/// - `502 Bad Gateway` if the tile could not be downloaded
/// - `500 Internal Server Error` on unexpected errors
#[axum::debug_handler]
pub async fn get_elevation(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ElevationQuery>, QueryRejection>,
) -> Response {
    let Ok(Query(query)) = query else {
        return error_json(StatusCode::BAD_REQUEST, INVALID_QUERY.to_string());
    };
    tracing::debug!(lat = query.lat, lng = query.lng, zoom = ?query.zoom, "Elevation query");

    let point = match GeoPoint::new(query.lat, query.lng) {
        Ok(point) => point,
        Err(e) => return error_response(&e),
    };

    let result = run_blocking(state, move |service| {
        let zoom = query.zoom.unwrap_or(service.default_zoom());
        service.lookup(point, zoom)
    })
    .await;

    match result {
        Ok(elevation) => {
            tracing::info!(
                lat = query.lat,
                lng = query.lng,
                elevation = elevation,
                "Elevation found"
            );
            Json(elevation).into_response()
        }
        Err(response) => response,
    }
}

/// Get elevations for a batch of coordinates.
///
/// The body is a JSON array of `[lat, lng]` pairs. The whole batch is
/// rejected if any coordinate is invalid, and fails with the first lookup
/// error otherwise.
///
/// # Returns
///
/// - `200 OK` with a JSON array of elevations in request order
/// - `400 Bad Request` if the payload or a coordinate is invalid
/// - `413 Payload Too Large` if the body exceeds the configured limit
/// - `502 Bad Gateway` if a tile could not be downloaded
#[axum::debug_handler]
pub async fn post_elevations(
    State(state): State<Arc<AppState>>,
    Query(zoom): Query<ZoomQuery>,
    payload: Result<Json<Vec<(f64, f64)>>, JsonRejection>,
) -> Response {
    let coords = match payload {
        Ok(Json(coords)) => coords,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_json(StatusCode::PAYLOAD_TOO_LARGE, rejection.body_text());
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected batch payload");
            return error_json(StatusCode::BAD_REQUEST, INVALID_PAYLOAD.to_string());
        }
    };

    if let Some(e) = coords
        .iter()
        .find_map(|&(lat, lng)| GeoPoint::new(lat, lng).err())
    {
        return error_response(&e);
    }

    let count = coords.len();
    let result = run_blocking(state, move |service| {
        let zoom = zoom.zoom.unwrap_or(service.default_zoom());
        service
            .get_elevations_batch(&coords, zoom)
            .into_iter()
            .collect::<terrain::Result<Vec<f32>>>()
    })
    .await;

    match result {
        Ok(elevations) => {
            tracing::info!(points = count, "Batch elevations found");
            Json(elevations).into_response()
        }
        Err(response) => response,
    }
}

/// Liveness check.
///
/// Returns `Ok` while the tile cache directory is usable, `Error` otherwise.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let cache_dir = state.elevation_service.cache_dir().to_path_buf();

    match tokio::fs::create_dir_all(&cache_dir).await {
        Ok(()) => (StatusCode::OK, "Ok").into_response(),
        Err(e) => {
            tracing::warn!(
                cache_dir = %cache_dir.display(),
                error = %e,
                "Cache directory unusable"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Error").into_response()
        }
    }
}

/// Get cache and download statistics.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let service = &state.elevation_service;
    let cache = service.cache_stats();
    let downloads = service.download_stats();

    Json(StatsResponse {
        open_tiles: cache.entry_count,
        capacity: service.cache_capacity(),
        cache_hits: cache.hit_count,
        cache_misses: cache.miss_count,
        evictions: cache.eviction_count,
        hit_rate: cache.hit_rate(),
        tiles_downloaded: downloads.tiles_downloaded,
        bytes_downloaded: downloads.bytes_downloaded,
    })
}

/// Run a lookup on the blocking pool, turning any failure into a response.
async fn run_blocking<T, F>(state: Arc<AppState>, lookup: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&ElevationService) -> terrain::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || lookup(&state.elevation_service)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(&e)),
        Err(e) => {
            tracing::error!(error = %e, "Elevation lookup task failed");
            Err(error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Elevation lookup task failed".to_string(),
            ))
        }
    }
}

/// HTTP status for a library error.
pub fn status_for(e: &TerrainError) -> StatusCode {
    match e {
        TerrainError::InvalidCoordinate { .. }
        | TerrainError::InvalidZoom { .. }
        | TerrainError::InvalidTile { .. }
        | TerrainError::InvalidBoundingBox { .. } => StatusCode::BAD_REQUEST,
        TerrainError::FetchFailed { .. } | TerrainError::LoadFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create an error response for elevation queries.
fn error_response(e: &TerrainError) -> Response {
    let status = status_for(e);
    if status.is_server_error() {
        tracing::warn!(error = %e, "Elevation query failed");
    } else {
        tracing::debug!(error = %e, "Rejected elevation query");
    }
    error_json(status, e.to_string())
}

fn error_json(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_elevation_query_deserialize() {
        let json = r#"{"lat": 52.388, "lng": 13.119}"#;
        let query: ElevationQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.lat, 52.388);
        assert_eq!(query.lng, 13.119);
        assert_eq!(query.zoom, None);

        let json = r#"{"lat": 52.388, "lng": 13.119, "zoom": 12}"#;
        let query: ElevationQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.zoom, Some(12));
    }

    #[test]
    fn test_error_response_serialize() {
        let response = ErrorResponse {
            error: "Invalid zoom level: 31 (maximum is 30)".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"error":"Invalid zoom level: 31 (maximum is 30)"}"#);
    }

    #[test]
    fn test_status_for_errors() {
        let invalid = TerrainError::InvalidCoordinate {
            lat: 91.0,
            lng: 0.0,
        };
        assert_eq!(status_for(&invalid), StatusCode::BAD_REQUEST);

        let zoom = TerrainError::InvalidZoom { zoom: 31, max: 30 };
        assert_eq!(status_for(&zoom), StatusCode::BAD_REQUEST);

        let fetch = TerrainError::FetchFailed {
            url: "https://example.com/14/8789/5383.tif".to_string(),
            reason: "HTTP 503".to_string(),
        };
        assert_eq!(status_for(&fetch), StatusCode::BAD_GATEWAY);

        let waited = TerrainError::LoadFailed {
            key: "14/8789/5383".to_string(),
            reason: "HTTP 503".to_string(),
        };
        assert_eq!(status_for(&waited), StatusCode::BAD_GATEWAY);

        let corrupt = TerrainError::RasterDecode {
            path: PathBuf::from("14/8789/5383.tif"),
            reason: "not a TIFF".to_string(),
        };
        assert_eq!(status_for(&corrupt), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
