use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type for protocol-level operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
