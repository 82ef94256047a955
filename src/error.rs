//! Error types for broker consumers and producers.

use thiserror::Error;

/// Errors raised by the broker layer, the supervisor and the producer.
#[derive(Debug, Error)]
pub enum MqError {
    /// Could not open a connection or channel to the broker
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// A channel-level call (declare, bind, consume, publish, ack...) failed
    #[error("Broker operation `{operation}` failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    /// `publish` was called before `declare` succeeded
    #[error("Publish rejected: topology has not been declared")]
    NotDeclared,

    /// Reconnect policy ran out of attempts
    #[error("Reconnect gave up after {attempts} attempt(s): {source}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: Box<MqError>,
    },

    /// No usable network interface for audit records
    #[error("No non-loopback IPv4 address found on any interface")]
    NoLocalAddress,

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MqError {
    /// Wrap a failed channel call.
    pub fn operation(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Operation {
            operation,
            message: err.to_string(),
        }
    }
}

impl From<lapin::Error> for MqError {
    fn from(err: lapin::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, MqError>;
