use serde::Deserialize;

use crate::shared::{BigQueryConfig, JobConfig, PipelineConfig, ValidationError, VmPayConfig};

/// Complete configuration for one run of the sync binary.
///
/// Source and destination sections are optional so that local-only jobs such as
/// merging historical files can run without credentials. [`SyncConfig::validate`]
/// requires them for the jobs that use them.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub source: Option<VmPayConfig>,
    #[serde(default)]
    pub destination: Option<BigQueryConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub job: JobConfig,
}

impl SyncConfig {
    /// Validates every section required by the configured job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;

        match &self.source {
            Some(source) => source.validate()?,
            None if self.job.needs_source() => {
                return Err(ValidationError::EmptyField("source".to_string()));
            }
            None => {}
        }

        match &self.destination {
            Some(destination) => destination.validate()?,
            None if self.job.needs_destination() => {
                return Err(ValidationError::EmptyField("destination".to_string()));
            }
            None => {}
        }

        Ok(())
    }
}
