//! Error types for the node store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store is closed")]
    StoreClosed,

    #[error("store is open")]
    StoreOpen,

    #[error("invalid file index: {0}")]
    InvalidFileIndex(u32),

    #[error("missing tree files: expected contiguous segments up to {0}, found gap at {1}")]
    MissingTreeFiles(u32, u32),

    #[error("database corruption: invalid node tag {0:#x} at segment {1}, offset {2}")]
    DatabaseCorruption(u8, u32, u32),

    #[error("invalid meta magic at segment {0}, offset {1}")]
    InvalidMagic(u32, u32),

    #[error("invalid meta checksum at segment {0}, offset {1}")]
    InvalidChecksum(u32, u32),

    #[error("missing node for root hash {0}")]
    MissingNode(String),

    #[error("assertion failed: {0}")]
    AssertionError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Stable short code, analogous to a wire-protocol error code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::StoreClosed => "STORE_CLOSED",
            StoreError::StoreOpen => "STORE_OPEN",
            StoreError::InvalidFileIndex(_) => "INVALID_FILE_INDEX",
            StoreError::MissingTreeFiles(_, _) => "MISSING_TREE_FILES",
            StoreError::DatabaseCorruption(_, _, _) => "DATABASE_CORRUPTION",
            StoreError::InvalidMagic(_, _) => "INVALID_MAGIC",
            StoreError::InvalidChecksum(_, _) => "INVALID_CHECKSUM",
            StoreError::MissingNode(_) => "MISSING_NODE",
            StoreError::AssertionError(_) => "ASSERTION_ERROR",
            StoreError::Io(_) => "IO_ERROR",
        }
    }
}
