//! Structured errors for the vroot core.
//!
//! Every failure names the field, value or partition size it concerns, so callers
//! can render, log, or match on them without scraping message text.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Hashtree descriptor not found in tool output")]
    DescriptorNotFound,
    #[error("Hashtree descriptor is missing field {0:?}")]
    MissingField(String),
    #[error("Field {field:?} is not a valid non-negative integer: {value:?}")]
    InvalidNumericField { field: String, value: String },
    #[error("Field {field:?} is not an even-length hex string: {value:?}")]
    InvalidHexField { field: String, value: String },
    #[error("dm-verity version {0} is not supported")]
    UnsupportedVerityVersion(u32),
    #[error("Capacity oracle failed for partition size {partition_size}: {reason}")]
    OracleFailure { partition_size: u64, reason: String },
    #[error("No partition size up to {ceiling} bytes can hold an image of {image_size} bytes")]
    NoFeasiblePartitionSize { image_size: u64, ceiling: u64 },
    #[error("Failed to run {tool}: {reason}")]
    ToolFailure { tool: String, reason: String },
    #[error("No partition UUID found for {0}")]
    StorageIdNotFound(String),
    #[error("Failed to load configuration {path}: {reason}")]
    Config { path: String, reason: String },
}

impl Error {
    pub fn missing(field: &str) -> Self {
        Self::MissingField(field.to_owned())
    }

    pub fn invalid_number(field: &str, value: &str) -> Self {
        Self::InvalidNumericField {
            field: field.to_owned(),
            value: value.to_owned(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
