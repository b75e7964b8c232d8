use thiserror::Error;

#[derive(Error, Debug)]
pub enum SextantError {
    #[error("Configuration error in '{field}': {reason}")]
    ConfigurationError { field: String, reason: String },

    #[error("Invalid version '{raw}': {reason}")]
    InvalidVersion { raw: String, reason: String },

    #[error("Invalid migration name '{name}': {reason}")]
    InvalidMigrationName { name: String, reason: String },

    #[error("Found more than one migration with version {version} ({first}, {second})")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("Unterminated string literal starting at line {line}")]
    UnterminatedLiteral { line: usize },

    #[error("Unterminated block comment starting at line {line}")]
    UnterminatedBlockComment { line: usize },

    #[error("Schema store failure: {cause}")]
    StoreFailure { cause: String },

    #[error("Statement exceeded the {timeout_secs}s timeout: {statement}")]
    StatementTimeout {
        statement: String,
        timeout_secs: u64,
    },

    #[error("Could not acquire the migration lock after {attempts} attempts")]
    LockUnavailable { attempts: u32 },

    #[error("Baseline not allowed: {reason}")]
    BaselineNotAllowed { reason: String },

    #[error("Validation failed: {detail}")]
    ValidationFailed { detail: String },

    #[error("Migration to version {version} failed: {cause}")]
    MigrationFailed { version: String, cause: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<scylla::transport::errors::QueryError> for SextantError {
    fn from(e: scylla::transport::errors::QueryError) -> Self {
        SextantError::StoreFailure {
            cause: e.to_string(),
        }
    }
}

impl From<scylla::transport::errors::NewSessionError> for SextantError {
    fn from(e: scylla::transport::errors::NewSessionError) -> Self {
        SextantError::StoreFailure {
            cause: e.to_string(),
        }
    }
}

impl From<scylla::cql_to_rust::FromRowError> for SextantError {
    fn from(e: scylla::cql_to_rust::FromRowError) -> Self {
        SextantError::StoreFailure {
            cause: format!("unexpected ledger row: {}", e),
        }
    }
}

impl From<scylla::transport::query_result::RowsExpectedError> for SextantError {
    fn from(e: scylla::transport::query_result::RowsExpectedError) -> Self {
        SextantError::StoreFailure {
            cause: format!("rows expected: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SextantError>;
