//! Consumption accounting
//!
//! Converts a print job's theoretical per-filament usage into weight
//! deductions on the mapped spools.
//!
//! - `percent_complete == 0`: nothing is deducted
//! - `percent_complete == 100`: full theoretical weight
//! - otherwise: `(percent_complete - init_percent) / (100 - init_percent)`,
//!   clamped to `[0, 1]`; an undefined ratio falls back to 1 with a warning
//!
//! The mapping is read once up front. Deduction requests go out after the
//! mapping lock is released, so a slow inventory never blocks map/unmap.
//! Lines that scale to zero grams are skipped rather than posted.

use crate::mapping::{Mapping, MappingStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Inventory collaborator failures
#[derive(Debug, Error)]
pub enum InventoryError {
    /// No inventory endpoint configured
    #[error("Inventory not configured")]
    NotConfigured,

    /// Transport-level failure
    #[error("Inventory request failed: {0}")]
    Request(String),

    /// Inventory answered with a non-success status
    #[error("Inventory returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Spool inventory that accepts weight deductions
#[async_trait]
pub trait SpoolInventory: Send + Sync {
    /// Deduct `grams` from spool `spool_id`
    async fn use_weight(&self, spool_id: &str, grams: f64) -> Result<(), InventoryError>;
}

/// One line of a job's theoretical filament usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    #[serde(alias = "filamentId")]
    pub filament_id: String,
    /// Grams; scaled in place by the completion multiplier
    #[serde(alias = "weight")]
    pub weight_grams: f64,
}

impl ConsumptionRecord {
    pub fn new(filament_id: impl Into<String>, weight_grams: f64) -> Self {
        Self {
            filament_id: filament_id.into(),
            weight_grams,
        }
    }
}

/// A print job as reported by the printer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub total_weight: f64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub theoretical_filaments: Vec<ConsumptionRecord>,
    /// Lines actually deducted; filled by [`ConsumptionAccountant::apply`]
    #[serde(default)]
    pub reported_filaments: Vec<ConsumptionRecord>,
    /// Completion percentage when this job was picked up (resumed jobs)
    #[serde(default)]
    pub init_percent: f64,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub image_cover_url: Option<String>,
}

/// What happened to each line of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountingReport {
    /// `None` when the job had not progressed and nothing was deducted
    pub multiplier: Option<f64>,
    pub reported: Vec<ConsumptionRecord>,
    /// Filament ids with no mapped spool
    pub unmapped: Vec<String>,
    /// Filament ids whose deduction request failed
    pub failed: Vec<String>,
    /// Mapped filament ids with nothing left to deduct after scaling
    pub skipped: Vec<String>,
}

/// Fraction of the theoretical weight actually consumed
///
/// Returns `None` for a job that has not progressed.
pub fn completion_multiplier(percent_complete: f64, init_percent: f64) -> Option<f64> {
    if percent_complete == 0.0 {
        return None;
    }
    if percent_complete == 100.0 {
        return Some(1.0);
    }

    let ratio = (percent_complete - init_percent) / (100.0 - init_percent);
    if !ratio.is_finite() {
        warn!(
            percent_complete,
            init_percent, "Cannot compute completion multiplier, using 1"
        );
        return Some(1.0);
    }
    Some(ratio.clamp(0.0, 1.0))
}

/// Posts job consumption against mapped spools
#[derive(Debug, Clone)]
pub struct ConsumptionAccountant {
    store: MappingStore,
}

impl ConsumptionAccountant {
    pub fn new(store: MappingStore) -> Self {
        Self { store }
    }

    /// Scale the job's consumption and post one deduction per mapped line
    ///
    /// Never fails: unmapped lines and rejected requests are recorded in the
    /// report and left out of `job.reported_filaments`. Lines that scale to
    /// zero grams are not posted.
    pub async fn apply(
        &self,
        job: &mut PrintJob,
        inventory: &dyn SpoolInventory,
    ) -> AccountingReport {
        let mut report = AccountingReport::default();
        job.reported_filaments.clear();

        let Some(multiplier) = completion_multiplier(job.percent_complete, job.init_percent)
        else {
            info!(job_id = ?job.job_id, "Job has not progressed, nothing to deduct");
            return report;
        };
        report.multiplier = Some(multiplier);

        if job.percent_complete == 100.0 {
            info!(job_id = ?job.job_id, "Complete job");
        } else {
            warn!(
                job_id = ?job.job_id,
                percent_complete = job.percent_complete,
                multiplier,
                "Incomplete job, scaling consumption"
            );
        }

        let store = self.store.clone();
        let mapping = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(mapping) => mapping,
            Err(e) => {
                error!(error = %e, "Mapping read task failed");
                Mapping::new()
            }
        };

        for record in job.theoretical_filaments.iter_mut() {
            record.weight_grams *= multiplier;

            let Some(spool_id) = mapping.get(&record.filament_id) else {
                error!(filament_id = %record.filament_id, "No corresponding spool for filament");
                report.unmapped.push(record.filament_id.clone());
                continue;
            };
            if record.weight_grams <= 0.0 {
                info!(filament_id = %record.filament_id, spool_id = %spool_id, "Nothing to deduct");
                report.skipped.push(record.filament_id.clone());
                continue;
            }

            match inventory.use_weight(spool_id, record.weight_grams).await {
                Ok(()) => {
                    info!(
                        filament_id = %record.filament_id,
                        spool_id = %spool_id,
                        grams = record.weight_grams,
                        "Consumption reported"
                    );
                    report.reported.push(record.clone());
                }
                Err(e) => {
                    error!(
                        filament_id = %record.filament_id,
                        spool_id = %spool_id,
                        error = %e,
                        "Consumption not reported"
                    );
                    report.failed.push(record.filament_id.clone());
                }
            }
        }

        job.reported_filaments = report.reported.clone();
        report
    }
}
