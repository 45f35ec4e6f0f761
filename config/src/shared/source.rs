use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Connection settings for the VM Pay REST API.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking the access token into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct VmPayConfig {
    /// Base URL of the API, without a trailing endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Access token sent as the `access_token` query parameter.
    pub access_token: SecretString,
    /// Page size used when paginating transactional endpoints.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Pause between consecutive page requests, in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Timeout applied to every HTTP request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry policy for transient request failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl VmPayConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://vmpay.vertitecnologia.com.br/api/v1";

    pub const DEFAULT_PER_PAGE: u32 = 100;

    pub const DEFAULT_PAGE_DELAY_MS: u64 = 1000;

    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::EmptyField("source.base_url".to_string()));
        }

        if self.per_page == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.per_page".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.retry.validate()
    }
}

fn default_base_url() -> String {
    VmPayConfig::DEFAULT_BASE_URL.to_string()
}

fn default_per_page() -> u32 {
    VmPayConfig::DEFAULT_PER_PAGE
}

fn default_page_delay_ms() -> u64 {
    VmPayConfig::DEFAULT_PAGE_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    VmPayConfig::DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Exponential backoff policy for retrying failed requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

    pub const DEFAULT_MAX_DELAY_MS: u64 = 8000;

    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.retry.max_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if !(self.backoff_factor >= 1.0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.retry.backoff_factor".to_string(),
                constraint: "must be at least 1.0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    RetryConfig::DEFAULT_BACKOFF_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> VmPayConfig {
        VmPayConfig {
            base_url: default_base_url(),
            access_token: SecretString::new("token".to_string()),
            per_page: 100,
            page_delay_ms: 0,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn default_source_is_valid() {
        assert_eq!(source().validate(), Ok(()));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut config = source();
        config.per_page = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "source.per_page"
        ));
    }

    #[test]
    fn retry_policy_is_validated() {
        let mut config = source();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = source();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = source();
        config.retry.backoff_factor = f64::NAN;
        assert!(config.validate().is_err());
    }
}
