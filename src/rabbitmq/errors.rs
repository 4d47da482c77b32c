// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("Connection not established. Call establish_connection() first.")]
    NotConnected,

    #[error("Connection timeout: {0}")]
    TimeoutError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{label} path not provided")]
    MissingTlsPath { label: &'static str },

    #[error("{label} at {}: {source}", .path.display())]
    TlsFile {
        label: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    /// The underlying file-system error, when a certificate file could not be used.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            RabbitMQError::TlsFile { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

// Converting from lapin errors
impl From<LapinError> for RabbitMQError {
    fn from(error: LapinError) -> Self {
        // Use string representation for classification
        let error_text = error.to_string();

        if error_text.contains("connection") {
            RabbitMQError::ConnectionError(error_text)
        } else if error_text.contains("channel") {
            RabbitMQError::ChannelError(error_text)
        } else if error_text.contains("publish") {
            RabbitMQError::PublishError(error_text)
        } else {
            RabbitMQError::Unknown(error_text)
        }
    }
}

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::TimeoutError("Operation timed out".to_string())
    }
}

impl From<tokio_rustls::rustls::Error> for RabbitMQError {
    fn from(error: tokio_rustls::rustls::Error) -> Self {
        RabbitMQError::TlsError(error.to_string())
    }
}
