use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The job a single run of the sync binary performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobConfig {
    /// Fetches one day of cashless facts plus all reference tables and upserts them
    /// straight into BigQuery. Defaults to yesterday when no date is given.
    DailySync {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    /// Writes the recent cashless window and all reference tables to CSV.
    Extract,
    /// Writes weekly historical cashless CSV files, skipping existing ones.
    Backfill {
        /// Exclusive end of the backfill; defaults to now.
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    /// Combines historical CSV files into one deduplicated cashless file.
    MergeHistory,
    /// Upserts every CSV file of the data directory into BigQuery.
    Load,
    /// Runs extract, merge history and load in sequence.
    Full,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::DailySync { date: None }
    }
}

impl JobConfig {
    /// Returns whether the job writes to BigQuery.
    pub fn needs_destination(&self) -> bool {
        matches!(
            self,
            JobConfig::DailySync { .. } | JobConfig::Load | JobConfig::Full
        )
    }

    /// Returns whether the job calls the VM Pay API.
    pub fn needs_source(&self) -> bool {
        matches!(
            self,
            JobConfig::DailySync { .. }
                | JobConfig::Extract
                | JobConfig::Backfill { .. }
                | JobConfig::Full
        )
    }
}
