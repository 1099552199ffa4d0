//! Error types for NCSF container and SDAT parsing

/// Error type for container and sound-data parsing operations
#[derive(thiserror::Error, Debug)]
pub enum SdatError {
    /// Malformed NCSF wrapper (magic/version/size mismatch, truncated data)
    #[error("Malformed NCSF: {0}")]
    MalformedNcsf(String),

    /// Malformed SDAT archive (magic, section offset out of range, bad file-id)
    #[error("Malformed SDAT: {0}")]
    MalformedSdat(String),

    /// A referenced file (e.g. a `_lib` sibling) could not be loaded
    #[error("Missing referenced file: {0}")]
    MissingFile(String),

    /// zlib decompression of the program section failed
    #[error("Decompression error: {0}")]
    DecompressionError(String),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SdatError {
    fn from(s: String) -> Self {
        SdatError::Other(s)
    }
}

impl From<&str> for SdatError {
    fn from(s: &str) -> Self {
        SdatError::Other(s.to_string())
    }
}

/// Result type for parsing operations
pub type Result<T> = std::result::Result<T, SdatError>;
