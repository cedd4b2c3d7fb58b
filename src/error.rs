//! Error types for the segment store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Write-path preconditions. These are caller bugs, surfaced as errors
    // so the operation aborts before any data is written.
    #[error("Attribute writer for '{field}' has no convertor")]
    ConvertorNotSet { field: String },

    #[error("Attribute writer for '{field}' already has a convertor")]
    ConvertorAlreadySet { field: String },

    #[error("Value for '{field}' is {actual} bytes, expected {expected}")]
    ValueSizeMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Unknown segment: {0}")]
    UnknownSegment(u32),

    #[error("Document has no primary key (field '{0}')")]
    MissingPrimaryKey(String),

    #[error("Build protection: active segment holds {bytes} bytes (threshold {threshold})")]
    BuildProtection { bytes: u64, threshold: u64 },

    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    #[error("Merge cancelled")]
    MergeCancelled,

    #[error("Merge error: {0}")]
    Merge(String),
}

impl StoreError {
    /// Stable error code for tooling output
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "IO_ERROR",
            StoreError::Serialization(_) | StoreError::Json(_) => "SERIALIZATION_ERROR",
            StoreError::InvalidFormat(_) => "INVALID_FORMAT",
            StoreError::Config(_) => "INVALID_CONFIG",
            StoreError::ConvertorNotSet { .. }
            | StoreError::ConvertorAlreadySet { .. }
            | StoreError::ValueSizeMismatch { .. } => "PRECONDITION_VIOLATED",
            StoreError::UnknownField(_) => "UNKNOWN_FIELD",
            StoreError::UnknownIndex(_) => "UNKNOWN_INDEX",
            StoreError::UnknownSegment(_) => "UNKNOWN_SEGMENT",
            StoreError::MissingPrimaryKey(_) => "MISSING_PRIMARY_KEY",
            StoreError::BuildProtection { .. } => "BUILD_PROTECTION",
            StoreError::MergeConflict(_) => "MERGE_CONFLICT",
            StoreError::MergeCancelled => "MERGE_CANCELLED",
            StoreError::Merge(_) => "MERGE_FAILED",
        }
    }

    /// Precondition violations indicate a defect at the call site.
    pub fn is_precondition(&self) -> bool {
        self.code() == "PRECONDITION_VIOLATED"
    }
}
