use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A required string field is empty.
    #[error("`{0}` cannot be empty")]
    EmptyField(String),
    /// Both an inline service account key and a key path were provided.
    #[error("only one of `service_account_key` and `service_account_key_path` can be set")]
    ConflictingCredentials,
}
