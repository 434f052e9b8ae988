//! Error types for the SkyWorking injector

use thiserror::Error;

/// Main error type for injector operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The admission request did not carry a decodable Pod
    #[error("decode error: {0}")]
    Decode(String),

    /// A patch value could not be serialized to JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid process configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTPS listener failed
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}
