//! Integration tests for the HTTP API.

#[path = "../../terrain/tests/common/geotiff.rs"]
mod geotiff;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use geotiff::{write_geotiff, GeoTiffSpec};
use serde_json::{json, Value};
use tempfile::TempDir;
use terrain::{ElevationService, TerrainError, TileAddress, TileFetcher};
use terrain_service::{config::DEFAULT_MAX_POST_BYTES, router, AppState};

const POTSDAM: &str = "lat=52.3882084&lng=13.119842";

/// Serves a tile for any `{z}/{x}/{y}.tif` URL whose every sample equals
/// the tile's `x` index.
#[derive(Default)]
struct TileIndexFetcher {
    failing: bool,
    calls: AtomicUsize,
}

impl TileIndexFetcher {
    fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileFetcher for TileIndexFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> terrain::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(TerrainError::FetchFailed {
                url: url.to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
            });
        }

        let mut parts = url.rsplit('/');
        let y = parts.next().unwrap().trim_end_matches(".tif");
        let x = parts.next().unwrap();
        let z = parts.next().unwrap();
        let tile: TileAddress = format!("{z}/{x}/{y}").parse().unwrap();

        write_geotiff(
            dest,
            &GeoTiffSpec::mercator_tile(tile.zoom, tile.x, tile.y, 16),
            |_, _| tile.x as f32,
        );
        Ok(fs::metadata(dest)?.len())
    }
}

/// Create a test server backed by `fetcher`.
fn create_test_server(cache_dir: &Path, fetcher: Arc<TileIndexFetcher>) -> TestServer {
    create_test_server_with_limit(cache_dir, fetcher, DEFAULT_MAX_POST_BYTES)
}

fn create_test_server_with_limit(
    cache_dir: &Path,
    fetcher: Arc<TileIndexFetcher>,
    max_post_bytes: usize,
) -> TestServer {
    let elevation_service = ElevationService::builder(cache_dir)
        .capacity(8)
        .fetcher(fetcher)
        .build()
        .unwrap();
    let state = Arc::new(AppState { elevation_service });

    TestServer::new(router(state, max_post_bytes)).unwrap()
}

#[tokio::test]
async fn test_elevation_endpoint_success() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    let response = server.get(&format!("/?{POTSDAM}")).await;

    response.assert_status_ok();
    let elevation: f64 = response.json();
    assert_eq!(elevation, 8789.0);
    assert!(temp_dir
        .path()
        .join("14")
        .join("8789")
        .join("5383.tif")
        .is_file());

    // Second request is served from memory.
    server.get(&format!("/?{POTSDAM}")).await.assert_status_ok();
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_elevation_endpoint_zoom() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::default()));

    let response = server.get(&format!("/?{POTSDAM}&zoom=10")).await;
    response.assert_status_ok();
    assert_eq!(response.json::<f64>(), 549.0);

    let response = server.get(&format!("/?{POTSDAM}&zoom=31")).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("zoom"));
}

#[tokio::test]
async fn test_elevation_endpoint_invalid_coordinates() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    for query in ["lat=91.0&lng=0.0", "lat=0.0&lng=-180.5", "lat=NaN&lng=0.0"] {
        let response = server.get(&format!("/?{query}")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("Invalid coordinate"));
    }
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_elevation_endpoint_missing_params() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::default()));

    for path in ["/?lng=13.1", "/?lat=52.3", "/", "/?lat=north&lng=13.1"] {
        let response = server.get(path).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert!(json["error"].as_str().unwrap().contains("?lat=12.3&lng=45.6"));
    }
}

#[tokio::test]
async fn test_elevation_endpoint_fetch_failure() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::failing());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    let response = server.get(&format!("/?{POTSDAM}")).await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("HTTP 503"));

    // Failures are not cached.
    server.get(&format!("/?{POTSDAM}")).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_batch_endpoint_success() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    let payload = json!([[52.3882084, 13.119842], [52.38, 13.20], [52.3881, 13.1197]]);
    let response = server.post("/").json(&payload).await;

    response.assert_status_ok();
    let elevations: Vec<f64> = response.json();
    assert_eq!(elevations, vec![8789.0, 8792.0, 8789.0]);
    assert_eq!(fetcher.calls(), 2);

    let response = server.post("/?zoom=10").json(&json!([[52.3882084, 13.119842]])).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Vec<f64>>(), vec![549.0]);
}

#[tokio::test]
async fn test_batch_endpoint_empty() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::default()));

    let response = server.post("/").json(&json!([])).await;

    response.assert_status_ok();
    assert!(response.json::<Vec<f64>>().is_empty());
}

#[tokio::test]
async fn test_batch_endpoint_invalid_payload() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    for payload in [
        json!({"lat": 52.3, "lng": 13.1}),
        json!([[52.3]]),
        json!([["52.3", "13.1"]]),
        json!(null),
    ] {
        let response = server.post("/").json(&payload).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert!(json["error"].as_str().unwrap().contains("[[lat, lng], ...]"));
    }

    let response = server.post("/").text("52.3,13.1").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_batch_endpoint_rejects_whole_batch_on_invalid_coordinate() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server(temp_dir.path(), fetcher.clone());

    let payload = json!([[52.3882084, 13.119842], [95.0, 13.1]]);
    let response = server.post("/").json(&payload).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("lat=95"));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_batch_endpoint_fetch_failure() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::failing()));

    let payload = json!([[52.3882084, 13.119842], [52.3881, 13.1197]]);
    let response = server.post("/").json(&payload).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_batch_endpoint_body_limit() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Arc::new(TileIndexFetcher::default());
    let server = create_test_server_with_limit(temp_dir.path(), fetcher.clone(), 64);

    let payload = json!(vec![[52.3882084, 13.119842]; 20]);
    let response = server.post("/").json(&payload).await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_status_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");
    let server = create_test_server(&cache_dir, Arc::new(TileIndexFetcher::default()));

    let response = server.get("/status").await;

    response.assert_status_ok();
    assert_eq!(response.text(), "Ok");
    assert!(cache_dir.is_dir());
}

#[tokio::test]
async fn test_status_endpoint_unusable_cache_dir() {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");
    fs::write(&cache_dir, b"not a directory").unwrap();
    let server = create_test_server(&cache_dir, Arc::new(TileIndexFetcher::default()));

    let response = server.get("/status").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Error");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::default()));

    // Initial stats (no requests yet)
    let response = server.get("/stats").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["cache_hits"], 0);
    assert_eq!(json["cache_misses"], 0);
    assert_eq!(json["capacity"], 8);

    // First request downloads and opens the tile
    server.get(&format!("/?{POTSDAM}")).await;

    let response = server.get("/stats").await;
    let json: Value = response.json();
    assert_eq!(json["cache_misses"], 1);
    assert_eq!(json["open_tiles"], 1);
    assert_eq!(json["tiles_downloaded"], 1);

    // Another point in the same tile is a cache hit
    server.get("/?lat=52.3881&lng=13.1197").await;

    let response = server.get("/stats").await;
    let json: Value = response.json();
    assert_eq!(json["cache_hits"], 1);
    assert_eq!(json["cache_misses"], 1);
    assert_eq!(json["hit_rate"], 0.5);
}

#[tokio::test]
async fn test_unsupported_method() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(temp_dir.path(), Arc::new(TileIndexFetcher::default()));

    let response = server.put("/").await;
    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
}
