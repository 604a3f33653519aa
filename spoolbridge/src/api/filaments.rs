//! Filament catalog and mapping endpoints
//!
//! - `GET /api/filaments`: both catalog snapshots, the mapping, suggestions
//! - `PUT /api/mappings`: map (with steal) or unmap one slicer filament

use crate::catalog::{Catalog, FilamentRecord};
use crate::mapping::{Mapping, MappingChange};
use crate::reconcile::{mapping_status, possible_matches, MappingStatus};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// Everything a mapping UI needs in one payload
#[derive(Debug, Serialize)]
pub struct FilamentsResponse {
    pub slicer_filaments: Vec<FilamentRecord>,
    pub spools: Vec<FilamentRecord>,
    pub mappings: Mapping,
    pub possible_matches: BTreeMap<String, Vec<String>>,
    pub status: MappingStatus,
}

/// Request payload for `PUT /api/mappings`
///
/// `target_id: null` (or absent) removes the mapping.
#[derive(Debug, Deserialize)]
pub struct UpdateMappingRequest {
    #[serde(default)]
    pub source_id: Option<Value>,
    #[serde(default)]
    pub target_id: Option<Value>,
}

/// Accept string or numeric ids; blank strings count as absent
fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn filaments_payload(state: &AppState) -> FilamentsResponse {
    let paths = &state.paths;
    let catalog_a = Catalog::load_snapshot(&paths.slicer_catalog_file());
    let catalog_b = Catalog::load_snapshot(&paths.spoolman_catalog_file());
    let mappings = state.store.load();

    FilamentsResponse {
        possible_matches: possible_matches(&catalog_a, &catalog_b, &mappings, &state.matcher),
        status: mapping_status(&catalog_a, &catalog_b, &mappings),
        slicer_filaments: catalog_a.records().to_vec(),
        spools: catalog_b.records().to_vec(),
        mappings,
    }
}

/// Build the payload on the blocking pool; snapshot and mapping reads hit the disk
async fn load_payload(state: AppState) -> ApiResult<FilamentsResponse> {
    tokio::task::spawn_blocking(move || filaments_payload(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("Filament listing task failed: {}", e)))
}

/// GET /api/filaments
pub async fn get_filaments(State(state): State<AppState>) -> ApiResult<Json<FilamentsResponse>> {
    Ok(Json(load_payload(state).await?))
}

/// PUT /api/mappings
///
/// **Request:** `{"source_id": "GFA00", "target_id": "3"}` or `{"source_id": "GFA00", "target_id": null}`
/// **Response:** the refreshed [`FilamentsResponse`]
///
/// **Errors:**
/// - 400 Bad Request: missing or blank `source_id`
/// - 500 Internal Server Error: mapping file could not be written
pub async fn update_mapping(
    State(state): State<AppState>,
    Json(payload): Json<UpdateMappingRequest>,
) -> ApiResult<Json<FilamentsResponse>> {
    let source_id = id_value(payload.source_id.as_ref())
        .ok_or_else(|| ApiError::BadRequest("source_id is required".to_string()))?;
    let target_id = id_value(payload.target_id.as_ref());

    let store = state.store.clone();
    let source = source_id.clone();
    let change = tokio::task::spawn_blocking(move || store.update(&source, target_id.as_deref()))
        .await
        .map_err(|e| ApiError::Internal(format!("Mapping update task failed: {}", e)))??;

    match change {
        MappingChange::Mapped(outcome) => {
            if let Some(previous) = outcome.stolen_from {
                info!(
                    source = %source_id,
                    displaced = %previous,
                    "Mapping request displaced an existing binding"
                );
            }
        }
        MappingChange::Unmapped(None) => {
            info!(source = %source_id, "Unmap request for unmapped filament");
        }
        MappingChange::Unmapped(Some(_)) => {}
    }

    Ok(Json(load_payload(state).await?))
}

/// Build filament and mapping routes
pub fn filament_routes() -> Router<AppState> {
    Router::new()
        .route("/api/filaments", get(get_filaments))
        .route("/api/mappings", put(update_mapping))
}
