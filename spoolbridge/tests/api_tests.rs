//! HTTP surface integration tests
//!
//! Routers are driven with `tower::ServiceExt::oneshot` against a temporary
//! data folder and an in-memory inventory.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use spoolbridge::accounting::{InventoryError, SpoolInventory};
use spoolbridge::catalog::{Catalog, FilamentRecord};
use spoolbridge::matcher::Matcher;
use spoolbridge::{build_router, AppState};
use spoolbridge_common::config::DataPaths;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Default)]
struct MemoryInventory {
    calls: Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl SpoolInventory for MemoryInventory {
    async fn use_weight(&self, spool_id: &str, grams: f64) -> Result<(), InventoryError> {
        self.calls.lock().unwrap().push((spool_id.to_string(), grams));
        Ok(())
    }
}

struct TestApp {
    _dir: TempDir,
    router: Router,
    inventory: Arc<MemoryInventory>,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path());

    Catalog::from_records(vec![
        FilamentRecord::new("a1", "Bambu", "PLA", "Matte Black"),
        FilamentRecord::new("a2", "Bambu", "PETG", "Jade White"),
    ])
    .save_snapshot(&paths.slicer_catalog_file())
    .unwrap();
    Catalog::from_records(vec![
        FilamentRecord::new("b1", "Bambu", "PLA", "Matte Black @1kg"),
        FilamentRecord::new("b2", "Generic", "PLA", "Black"),
    ])
    .save_snapshot(&paths.spoolman_catalog_file())
    .unwrap();

    let inventory = Arc::new(MemoryInventory::default());
    let state = AppState::new(paths, Matcher::default(), inventory.clone(), true);

    TestApp {
        _dir: dir,
        router: build_router(state),
        inventory,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_reports_ok() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "spoolbridge");
    assert_eq!(body["inventory_configured"], true);
}

#[tokio::test]
async fn test_filaments_lists_catalogs_and_suggestions() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/api/filaments", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slicer_filaments"].as_array().unwrap().len(), 2);
    assert_eq!(body["spools"][0]["id"], "b1");
    assert_eq!(body["mappings"], json!({}));
    assert_eq!(body["possible_matches"]["a1"], json!(["b1"]));
    assert_eq!(body["status"]["mapped"], 0);
}

#[tokio::test]
async fn test_update_mapping_steals_and_unmaps() {
    let app = test_app();

    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"source_id": "a1", "target_id": "b1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mappings"], json!({"a1": "b1"}));

    let (_, body) = send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"source_id": "a2", "target_id": "b1"})),
    )
    .await;
    assert_eq!(body["mappings"], json!({"a2": "b1"}));

    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"source_id": "a2", "target_id": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mappings"], json!({}));
}

#[tokio::test]
async fn test_update_mapping_requires_source() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"target_id": "b1"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_post_job_deducts_and_records_history() {
    let app = test_app();
    send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"source_id": "a1", "target_id": "b1"})),
    )
    .await;

    let job = json!({
        "job_id": "42",
        "percent_complete": 50,
        "init_percent": 0,
        "theoretical_filaments": [
            {"filament_id": "a1", "weight_grams": 100.0},
            {"filament_id": "a2", "weight_grams": 10.0}
        ]
    });
    let (status, body) = send(&app.router, "POST", "/api/jobs", Some(job)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["multiplier"], 0.5);
    assert_eq!(body["report"]["unmapped"], json!(["a2"]));
    assert_eq!(body["job"]["reported_filaments"][0]["weight_grams"], 50.0);
    assert_eq!(
        *app.inventory.calls.lock().unwrap(),
        vec![("b1".to_string(), 50.0)]
    );

    let (status, jobs) = send(&app.router, "GET", "/api/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["job_id"], "42");
}

#[tokio::test]
async fn test_update_mapping_reports_unwritable_mapping_file() {
    let app = test_app();
    // A non-empty directory where the mapping file belongs
    let blocked = DataPaths::new(app._dir.path()).mapping_file();
    std::fs::create_dir(&blocked).unwrap();
    std::fs::write(blocked.join("x"), b"x").unwrap();

    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/mappings",
        Some(json!({"source_id": "a1", "target_id": "b1"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "PERSISTENCE_ERROR");

    let (status, body) = send(&app.router, "GET", "/api/filaments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mappings"], json!({}));
}
