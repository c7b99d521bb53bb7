//! Centralised error type for the schema upgrade.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Database error: {0}")]
    Db(#[from] mongodb::error::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error writing {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Verification failed: {0}")]
    Verification(String),
}
