use std::path::PathBuf;
use thiserror::Error;

/// Custom error type for rating store and pack-file operations.
#[derive(Error, Debug)]
pub enum PackError {
    /// An identifier was never interned by the key index it was looked up in.
    #[error("Key not found: {0}")]
    KeyNotFound(i64),

    #[error("Index {index} out of range (len={len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Mutation attempted after the builder was frozen.
    #[error("Rating store already built; no further mutation is permitted")]
    AlreadyBuilt,

    #[error("Rating store is full ({0} records)")]
    CapacityExceeded(usize),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Unsupported pack format: {0}")]
    UnsupportedFormat(String),

    #[error("Corruption detected: {details}")]
    Corruption {
        details: String,
        path: Option<PathBuf>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parse error at line {line}: {details}")]
    Parse { line: usize, details: String },
}

impl PackError {
    pub(crate) fn corruption(details: impl Into<String>, path: Option<&std::path::Path>) -> Self {
        PackError::Corruption {
            details: details.into(),
            path: path.map(|p| p.to_path_buf()),
        }
    }
}

impl From<bincode::Error> for PackError {
    fn from(err: bincode::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}
