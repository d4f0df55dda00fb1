use thiserror::Error;

/// Errors that end an audit run before any report can be produced.
///
/// Everything else an audit finds is recorded in the scoped report instead.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Not an ext2 image: bad magic 0x{found:04X} (expected 0x{expected:04X})")]
    NotExt2 { found: u16, expected: u16 },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(error: serde_json::Error) -> Self {
        AuditError::Configuration(error.to_string())
    }
}
