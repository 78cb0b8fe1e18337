//! Pipeline configuration
//!
//! Loaded from an optional JSON file, then overridden from the environment
//! (`.env` is honoured by the binary through `dotenv`).

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::schema::HeaderAliases;

pub const ENV_PROMOTION_CUTOFF: &str = "CAMPAIGN_KPI_PROMOTION_CUTOFF";
pub const ENV_REPORT_TITLE: &str = "CAMPAIGN_KPI_REPORT_TITLE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Header alias table used to recognise sheet columns.
    pub headers: HeaderAliases,

    /// When the raw sheet has no product-type column, reuse campaign type.
    pub product_type_from_campaign_type: bool,

    /// Rows dated strictly before this day form the "before" phase of the
    /// promotion comparison. No comparison sheet without it.
    pub promotion_cutoff: Option<NaiveDate>,

    pub report_title: String,

    pub include_charts: bool,

    /// Rows shown in each ranked table of the insights sheet.
    pub insights_top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            headers: HeaderAliases::default(),
            product_type_from_campaign_type: true,
            promotion_cutoff: None,
            report_title: "Marketing Performance Report".to_string(),
            include_charts: true,
            insights_top_n: 5,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from process environment variables.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_PROMOTION_CUTOFF) {
            let raw = raw.trim();
            if !raw.is_empty() {
                let cutoff = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                    PipelineError::Config(format!("{} must be YYYY-MM-DD, got '{}': {}", ENV_PROMOTION_CUTOFF, raw, e))
                })?;
                self.promotion_cutoff = Some(cutoff);
            }
        }
        if let Some(title) = lookup(ENV_REPORT_TITLE) {
            if !title.trim().is_empty() {
                self.report_title = title.trim().to_string();
            }
        }
        Ok(self)
    }
}
