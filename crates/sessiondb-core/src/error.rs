//! Error types for SessionDB Core

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Configuration errors
    #[error("No database configured: missing {0}")]
    ConfigurationMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Connection errors
    #[error("Failed to acquire connection: {0}")]
    ConnectionAcquisition(String),

    #[error("Session store is closed")]
    StoreClosed,

    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "serialization",
            Error::Deserialization(_) => "deserialization",
            Error::ConfigurationMissing(_) => "configuration_missing",
            Error::Config(_) => "config",
            Error::ConnectionAcquisition(_) => "connection_acquisition",
            Error::StoreClosed => "store_closed",
            Error::Timeout(_) => "timeout",
            Error::Database(_) => "database",
            Error::Schema(_) => "schema",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
