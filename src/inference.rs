// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Inference configuration.
//!
//! This module defines the [`InferenceConfig`] struct, which controls the
//! sliding-window geometry and the ONNX Runtime session options used for
//! U-Net inference.

use crate::device::Device;
use crate::error::Result;
use crate::geometry::{DEFAULT_INPUT_SIZE, DEFAULT_STEP, Shape3, WindowGeometry};
use crate::metadata::ModelMetadata;

/// Configuration for U-Net inference.
///
/// Uses a builder pattern for convenient construction.
///
/// # Example
///
/// ```rust
/// use synapse_unet::InferenceConfig;
///
/// let config = InferenceConfig::new()
///     .with_input_size([64, 64, 64])
///     .with_step([24, 24, 24])
///     .with_threads(4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InferenceConfig {
    /// Explicit window input size.
    /// If `None`, the model's metadata or the default of 64 per axis is used.
    pub input_size: Option<Shape3>,
    /// Explicit stride between window origins.
    /// If `None`, the model's metadata or the default of 24 per axis is used.
    pub step: Option<Shape3>,
    /// Number of intra-op threads for ONNX Runtime.
    /// Setting this to `0` allows ONNX Runtime to choose.
    pub num_threads: usize,
    /// Execution device. `None` runs on the CPU.
    pub device: Option<Device>,
}

impl InferenceConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window input size.
    #[must_use]
    pub const fn with_input_size(mut self, input_size: Shape3) -> Self {
        self.input_size = Some(input_size);
        self
    }

    /// Set the stride between window origins.
    #[must_use]
    pub const fn with_step(mut self, step: Shape3) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the number of threads for inference.
    ///
    /// # Arguments
    ///
    /// * `threads` - The number of intra-op threads. Set to `0` for auto-configuration.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Set the execution device.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Resolve the window geometry: explicit settings first, then model
    /// metadata, then the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting geometry is invalid.
    pub fn geometry(&self, metadata: &ModelMetadata) -> Result<WindowGeometry> {
        let input_size = self
            .input_size
            .or(metadata.input_size)
            .unwrap_or(DEFAULT_INPUT_SIZE);
        let step = self.step.or(metadata.step).unwrap_or(DEFAULT_STEP);
        WindowGeometry::new(input_size, step)
    }
}
