//! spoolbridge library interface
//!
//! Bridges a slicer's filament catalog to a Spoolman spool inventory:
//! normalizes both catalogs, matches them, keeps a persisted one-to-one
//! mapping, and turns print-job consumption into spool deductions.

pub mod accounting;
pub mod api;
pub mod catalog;
pub mod console;
pub mod error;
pub mod history;
pub mod mapping;
pub mod matcher;
pub mod reconcile;
pub mod spoolman;

pub use crate::error::{ApiError, ApiResult};

use crate::accounting::SpoolInventory;
use crate::history::JobHistory;
use crate::mapping::MappingStore;
use crate::matcher::Matcher;
use axum::Router;
use chrono::{DateTime, Utc};
use spoolbridge_common::config::DataPaths;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Data folder holding the mapping, catalog snapshots, and job history
    pub paths: DataPaths,
    pub store: MappingStore,
    pub matcher: Arc<Matcher>,
    pub inventory: Arc<dyn SpoolInventory>,
    pub inventory_configured: bool,
    pub history: JobHistory,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        paths: DataPaths,
        matcher: Matcher,
        inventory: Arc<dyn SpoolInventory>,
        inventory_configured: bool,
    ) -> Self {
        Self {
            store: MappingStore::new(paths.mapping_file()),
            history: JobHistory::new(paths.job_history_file()),
            paths,
            matcher: Arc::new(matcher),
            inventory,
            inventory_configured,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::filament_routes())
        .merge(api::job_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
