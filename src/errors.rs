use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Error types for capillary map processing
#[derive(Error, Debug)]
pub enum CapillaryMapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid scan positions: {0}")]
    ScanPositions(String),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Cannot create folder {path}: {source}")]
    FolderCreation {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Data sizes mismatch: expected {expected}, got {actual}")]
    DataSizeMismatch {
        expected: String,
        actual: String,
    },

    #[error("Map contains no layers")]
    NoLayers,
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, CapillaryMapError>;
