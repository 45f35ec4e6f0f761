use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Google BigQuery destination configuration.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking the service account key into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct BigQueryConfig {
    /// Google Cloud project identifier.
    pub project_id: String,
    /// BigQuery dataset that holds the final and staging tables.
    pub dataset_id: String,
    /// Inline service account key JSON.
    #[serde(default)]
    pub service_account_key: Option<SecretString>,
    /// Path to a service account key JSON file.
    #[serde(default)]
    pub service_account_key_path: Option<PathBuf>,
}

/// How the BigQuery client authenticates.
#[derive(Debug, Clone)]
pub enum BigQueryCredentials {
    Key(SecretString),
    KeyPath(PathBuf),
    /// Application default credentials from the environment.
    ApplicationDefault,
}

impl BigQueryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::EmptyField(
                "destination.project_id".to_string(),
            ));
        }

        if self.dataset_id.trim().is_empty() {
            return Err(ValidationError::EmptyField(
                "destination.dataset_id".to_string(),
            ));
        }

        if self.service_account_key.is_some() && self.service_account_key_path.is_some() {
            return Err(ValidationError::ConflictingCredentials);
        }

        Ok(())
    }

    /// Returns the credentials to use, preferring an inline key over a key path.
    pub fn credentials(&self) -> BigQueryCredentials {
        match (&self.service_account_key, &self.service_account_key_path) {
            (Some(key), _) => BigQueryCredentials::Key(key.clone()),
            (None, Some(path)) => BigQueryCredentials::KeyPath(path.clone()),
            (None, None) => BigQueryCredentials::ApplicationDefault,
        }
    }
}
