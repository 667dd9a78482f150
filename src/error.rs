use thiserror::Error;

use crate::models::Role;

/// A result record whose populated fields do not match its declared kind.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("record {index}: unknown result kind '{kind}'")]
    UnknownKind { index: usize, kind: String },

    #[error("record {index}: {kind} record is missing required field '{field}'")]
    MissingField {
        index: usize,
        kind: String,
        field: &'static str,
    },

    #[error("record {index}: {kind} record has invalid value '{value}' for field '{field}'")]
    InvalidValue {
        index: usize,
        kind: String,
        field: &'static str,
        value: String,
    },
}

/// Failures raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ScopeError {
    #[error("a {role} caller must be scoped to a student id")]
    MissingStudent { role: Role },
}

/// Anything that aborts a report request. No partial report is produced.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to fetch results: {0}")]
    UpstreamFetch(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Configuration section '{section}' is not configured (missing required fields)")]
    NotConfigured { section: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Figment(Box::new(error))
    }
}
