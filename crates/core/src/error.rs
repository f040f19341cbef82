//! Error types for workbook slimming.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while slimming a workbook package.
#[derive(Error, Debug)]
pub enum Error {
    /// Disk read or write failed.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a well-formed workbook package.
    #[error("Invalid workbook package: {0}")]
    InvalidPackage(String),

    /// A package entry required by the current operation is absent.
    #[error("Package entry not found: {0}")]
    EntryNotFound(String),

    /// A targeted XML part failed to parse.
    #[error("Malformed XML in {part}: {message}")]
    MalformedXml { part: String, message: String },

    /// An embedded image could not be decoded or re-encoded.
    #[error("Undecodable image asset {path}: {message}")]
    UndecodableAsset { path: String, message: String },

    /// The pre-run backup copy could not be created.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// ZIP archive error while reading or writing the package.
    #[error("ZIP error: {0}")]
    Zip(String),

    /// The file format is not supported.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The requested combination of stages and options is not runnable.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The run was cancelled between stages.
    #[error("Run cancelled")]
    Cancelled,

    /// A stage panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::MalformedXml`] for the given part.
    pub fn malformed_xml(part: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::MalformedXml {
            part: part.into(),
            message: message.to_string(),
        }
    }

    /// Whether a stage may absorb this error and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::UndecodableAsset { .. })
    }
}
