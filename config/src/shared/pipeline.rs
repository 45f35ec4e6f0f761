use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Local file layout and extraction windows of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory for intermediate CSV files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Number of days covered by the recent extraction job.
    #[serde(default = "default_recent_days_back")]
    pub recent_days_back: u32,
    /// First day of the historical backfill.
    #[serde(default = "default_backfill_start")]
    pub backfill_start: NaiveDate,
    /// Width of each backfill window, in days.
    #[serde(default = "default_backfill_step_days")]
    pub backfill_step_days: u32,
    /// Pause between backfill windows, in milliseconds.
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_ms: u64,
}

impl PipelineConfig {
    pub const DEFAULT_DATA_DIR: &'static str = "data";

    pub const DEFAULT_RECENT_DAYS_BACK: u32 = 7;

    pub const DEFAULT_BACKFILL_STEP_DAYS: u32 = 7;

    pub const DEFAULT_BACKFILL_DELAY_MS: u64 = 1000;

    /// Upper bound of `recent_days_back` and `backfill_step_days`.
    pub const MAX_WINDOW_DAYS: u32 = 3650;

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_window_days("pipeline.recent_days_back", self.recent_days_back)?;
        validate_window_days("pipeline.backfill_step_days", self.backfill_step_days)?;

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            recent_days_back: default_recent_days_back(),
            backfill_start: default_backfill_start(),
            backfill_step_days: default_backfill_step_days(),
            backfill_delay_ms: default_backfill_delay_ms(),
        }
    }
}

fn validate_window_days(field: &str, days: u32) -> Result<(), ValidationError> {
    if days == 0 || days > PipelineConfig::MAX_WINDOW_DAYS {
        return Err(ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: format!(
                "must be between 1 and {} days",
                PipelineConfig::MAX_WINDOW_DAYS
            ),
        });
    }

    Ok(())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(PipelineConfig::DEFAULT_DATA_DIR)
}

fn default_recent_days_back() -> u32 {
    PipelineConfig::DEFAULT_RECENT_DAYS_BACK
}

fn default_backfill_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

fn default_backfill_step_days() -> u32 {
    PipelineConfig::DEFAULT_BACKFILL_STEP_DAYS
}

fn default_backfill_delay_ms() -> u64 {
    PipelineConfig::DEFAULT_BACKFILL_DELAY_MS
}
