//! Tunable thresholds of the detection pipeline.

use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Pipeline configuration.
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Transfers per batch (N).
    pub batch_size: usize,
    /// A community is suspicious when intra weight exceeds this multiple of inter weight.
    pub suspicion_ratio: f64,
    /// Distinct neighbors per unit of incident weight below which an account is suspicious.
    pub diversity_threshold: f64,
    /// Processed transfer (and contract interaction) records kept before eviction.
    pub retention_window: usize,
    /// Cap on Louvain sweeps per level and on aggregation levels.
    pub max_iterations: usize,
    /// Accounts younger than this many days count as young.
    pub min_account_age_days: i64,
    /// Distinct counterparties above which a young account is suspicious.
    pub max_young_account_activity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            suspicion_ratio: 2.0,
            diversity_threshold: 0.5,
            retention_window: 10_000,
            max_iterations: 10,
            min_account_age_days: 30,
            max_young_account_activity: 100,
        }
    }
}

impl DetectorConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or fails validation.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !self.suspicion_ratio.is_finite() || self.suspicion_ratio < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "suspicion_ratio must be a non-negative number, got {}",
                self.suspicion_ratio
            )));
        }
        if !self.diversity_threshold.is_finite() || self.diversity_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "diversity_threshold must be a non-negative number, got {}",
                self.diversity_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_account_age_days < 0 {
            return Err(PipelineError::InvalidConfig(
                "min_account_age_days must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
