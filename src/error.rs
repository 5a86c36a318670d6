// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Error types for the segmentation library.

use std::fmt;

/// Result type alias for segmentation operations.
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Main error type for the segmentation library.
#[derive(Debug)]
pub enum SegmentationError {
    /// Error loading the ONNX model.
    ModelLoadError(String),
    /// Error during model inference.
    InferenceError(String),
    /// Window geometry or coordinate range is invalid.
    GeometryError(String),
    /// Two arrays that must agree in shape do not.
    ShapeMismatch(String),
    /// Chunked volume store error (missing dataset, bad attributes, corrupt block).
    StoreError(String),
    /// Wrapped `std::io::Error`
    Io(std::io::Error),
    /// Error parsing model metadata.
    MetadataError(String),
    /// Feature not enabled.
    FeatureNotEnabled(String),
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelLoadError(msg) => write!(f, "Model load error: {msg}"),
            Self::InferenceError(msg) => write!(f, "Inference error: {msg}"),
            Self::GeometryError(msg) => write!(f, "Geometry error: {msg}"),
            Self::ShapeMismatch(msg) => write!(f, "Shape mismatch: {msg}"),
            Self::StoreError(msg) => write!(f, "N5 store error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::MetadataError(msg) => write!(f, "Metadata error: {msg}"),
            Self::FeatureNotEnabled(msg) => write!(f, "Feature not enabled: {msg}"),
        }
    }
}

impl std::error::Error for SegmentationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SegmentationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for SegmentationError {
    fn from(err: serde_json::Error) -> Self {
        Self::StoreError(format!("invalid attributes.json: {err}"))
    }
}

impl From<ndarray::ShapeError> for SegmentationError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ShapeMismatch(err.to_string())
    }
}
