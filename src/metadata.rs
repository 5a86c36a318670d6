// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX model metadata parsing.
//!
//! Exported U-Net models may carry their window geometry and the names of
//! the custom training objects they were compiled with as custom metadata
//! properties. Every key is optional.

use std::collections::HashMap;

use crate::error::{Result, SegmentationError};
use crate::geometry::{Shape3, parse_triple};

/// Metadata keys read from the ONNX model.
pub const METADATA_KEYS: [&str; 7] = [
    "description",
    "author",
    "date",
    "version",
    "input_size",
    "step",
    "custom_objects",
];

/// Metadata extracted from a U-Net ONNX model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMetadata {
    /// Model description.
    pub description: String,
    /// Model author.
    pub author: String,
    /// Export date.
    pub date: String,
    /// Model version.
    pub version: String,
    /// Window input size the model was trained on.
    pub input_size: Option<Shape3>,
    /// Recommended stride between windows.
    pub step: Option<Shape3>,
    /// Custom training objects the model was compiled with.
    pub custom_objects: Vec<String>,
}

impl ModelMetadata {
    /// Build metadata from the model's custom metadata properties.
    ///
    /// # Errors
    ///
    /// Returns an error if `input_size` or `step` is present but malformed.
    pub fn from_onnx_metadata(metadata_map: &HashMap<String, String>) -> Result<Self> {
        let mut metadata = Self::default();

        for (key, value) in metadata_map {
            let value = value.trim().trim_matches('\'').trim_matches('"');
            match key.as_str() {
                "description" => metadata.description = value.to_string(),
                "author" => metadata.author = value.to_string(),
                "date" => metadata.date = value.to_string(),
                "version" => metadata.version = value.to_string(),
                "input_size" => metadata.input_size = Some(Self::parse_shape(key, value)?),
                "step" => metadata.step = Some(Self::parse_shape(key, value)?),
                "custom_objects" => metadata.custom_objects = Self::parse_list(value),
                _ => {}
            }
        }

        Ok(metadata)
    }

    /// Parse a shape written either as `[64, 64, 64]` or `64,64,64`.
    fn parse_shape(key: &str, value: &str) -> Result<Shape3> {
        let inner = value.trim_start_matches('[').trim_end_matches(']');
        parse_triple(inner)
            .map_err(|e| SegmentationError::MetadataError(format!("Invalid {key} value: {e}")))
    }

    /// Parse a list written either as `[a, b]` or `a,b`.
    fn parse_list(value: &str) -> Vec<String> {
        value
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|s| s.trim().trim_matches('\'').trim_matches('"'))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Short human-readable model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        if self.description.is_empty() {
            "U-Net"
        } else {
            &self.description
        }
    }
}
