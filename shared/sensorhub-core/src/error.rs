//! Error types for SensorHub services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Durable log error: {0}")]
    Log(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Malformed(_) | Self::Protocol(_) => 400,
            Self::Unavailable(_) | Self::Log(_) => 503,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Log(_) => "LOG_ERROR",
            Self::Malformed(_) => "MALFORMED_RECORD",
            Self::Subscription(_) => "SUBSCRIPTION_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Transport failures are retried by the owning loop; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Log(_) | Self::Subscription(_) | Self::Unavailable(_)
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Protocol(err.to_string())
    }
}
