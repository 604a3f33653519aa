//! Print job endpoints
//!
//! - `GET /api/jobs`: recorded job history
//! - `POST /api/jobs`: account a finished job against the mapped spools

use crate::accounting::{AccountingReport, ConsumptionAccountant, PrintJob};
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

/// Response payload for `POST /api/jobs`
#[derive(Debug, Serialize)]
pub struct JobAccountedResponse {
    pub report: AccountingReport,
    /// The job as stored, with scaled and reported consumption
    pub job: PrintJob,
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<PrintJob>>> {
    let history = state.history.clone();
    let jobs = tokio::task::spawn_blocking(move || history.load())
        .await
        .map_err(|e| ApiError::Internal(format!("Job history task failed: {}", e)))?;
    Ok(Json(jobs))
}

/// POST /api/jobs
///
/// Deduction failures are part of the report, not an error response. Only
/// a failure to record the job in history is a 500.
pub async fn post_job(
    State(state): State<AppState>,
    Json(mut job): Json<PrintJob>,
) -> ApiResult<Json<JobAccountedResponse>> {
    let accountant = ConsumptionAccountant::new(state.store.clone());
    let report = accountant.apply(&mut job, state.inventory.as_ref()).await;
    let history = state.history.clone();
    let stored = job.clone();
    tokio::task::spawn_blocking(move || history.append(&stored))
        .await
        .map_err(|e| ApiError::Internal(format!("Job history task failed: {}", e)))??;

    Ok(Json(JobAccountedResponse { report, job }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new().route("/api/jobs", get(list_jobs).post(post_job))
}
