//! Error types for playback operations

use sdat_core::SdatError;

/// Error type for the replayer engine
#[derive(thiserror::Error, Debug)]
pub enum ReplayerError {
    /// Error from container or SDAT parsing
    #[error("Format error: {0}")]
    Format(#[from] SdatError),

    /// A name lookup failed (interpolation method, sequence, tag)
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Invalid configuration (sample rate, mute mask, bit depth)
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A playback invariant was violated (treated as fatal)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error from filesystem or sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ReplayerError {
    fn from(s: String) -> Self {
        ReplayerError::Other(s)
    }
}

impl From<&str> for ReplayerError {
    fn from(s: &str) -> Self {
        ReplayerError::Other(s.to_string())
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, ReplayerError>;
