//! Spoolman REST client
//!
//! Implements [`SpoolInventory`] against a Spoolman server and fetches its
//! spool list for the target catalog. Failures are reported to the caller,
//! there is no retry.

use crate::accounting::{InventoryError, SpoolInventory};
use crate::catalog::{normalize_spools, Catalog};
use async_trait::async_trait;
use serde_json::{json, Value};
use spoolbridge_common::config::SpoolmanConfig;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("spoolbridge/", env!("CARGO_PKG_VERSION"));

/// Client for a Spoolman server
pub struct SpoolmanClient {
    http_client: reqwest::Client,
    base_url: Option<String>,
}

impl SpoolmanClient {
    pub fn new(config: &SpoolmanConfig) -> Result<Self, InventoryError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InventoryError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config
                .url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn url(&self, path: &str) -> Result<String, InventoryError> {
        let base = self.base_url.as_deref().ok_or(InventoryError::NotConfigured)?;
        Ok(format!("{}{}", base, path))
    }

    /// `GET /api/v1/spool`, normalized into a catalog
    pub async fn fetch_spools(&self) -> Result<Catalog, InventoryError> {
        let url = self.url("/api/v1/spool")?;
        debug!(url = %url, "Fetching spools");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| InventoryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let spools: Vec<Value> = response
            .json()
            .await
            .map_err(|e| InventoryError::Request(format!("Invalid spool list: {}", e)))?;
        Ok(normalize_spools(&spools))
    }
}

#[async_trait]
impl SpoolInventory for SpoolmanClient {
    async fn use_weight(&self, spool_id: &str, grams: f64) -> Result<(), InventoryError> {
        let url = self.url(&format!("/api/v1/spool/{}/use", spool_id))?;
        debug!(url = %url, grams, "Posting spool usage");

        let response = self
            .http_client
            .put(&url)
            .json(&json!({ "use_weight": grams }))
            .send()
            .await
            .map_err(|e| InventoryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
