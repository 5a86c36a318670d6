// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! U-Net model loading and inference.
//!
//! This module provides the [`UNetModel`] struct, which wraps an ONNX Runtime
//! session and predicts one volumetric patch at a time.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array5, ArrayD, Ix5, IxDyn};
#[cfg(feature = "coreml")]
use ort::execution_providers::CoreMLExecutionProvider;
#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;
#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::TensorRef;

use crate::device::Device;
use crate::error::{Result, SegmentationError};
use crate::geometry::WindowGeometry;
use crate::inference::InferenceConfig;
use crate::metadata::{METADATA_KEYS, ModelMetadata};
use crate::metrics::{CustomObject, TrainingMetrics};
use crate::tiling::Predictor;
use crate::verbose;

/// 3D U-Net for patch-wise segmentation.
///
/// The session is owned by the model and released when the model is dropped
/// or [`UNetModel::release`] is called.
///
/// # Example
///
/// ```no_run
/// use synapse_unet::{TrainingMetrics, UNetModel};
///
/// let model = UNetModel::load("unet.onnx", &TrainingMetrics::default())?;
/// println!("window geometry: {:?}", model.geometry());
/// model.release();
/// # Ok::<(), synapse_unet::SegmentationError>(())
/// ```
pub struct UNetModel {
    /// ONNX Runtime session.
    session: Session,
    /// Model metadata.
    metadata: ModelMetadata,
    /// Custom training objects the model declared, resolved against the registry.
    custom_objects: Vec<CustomObject>,
    /// Input tensor name.
    input_name: String,
    /// Output tensor name.
    output_name: String,
    /// Resolved sliding-window geometry.
    geometry: WindowGeometry,
    /// Inference configuration.
    config: InferenceConfig,
}

impl UNetModel {
    /// Load a U-Net from an ONNX file with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file doesn't exist, can't be loaded, or
    /// declares a custom training object missing from `metrics`.
    pub fn load<P: AsRef<Path>>(path: P, metrics: &TrainingMetrics) -> Result<Self> {
        Self::load_with_config(path, metrics, InferenceConfig::default())
    }

    /// Load a U-Net with custom configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the ONNX model file.
    /// * `metrics` - Training metrics the model may reference by name.
    /// * `config` - Custom inference configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file doesn't exist, can't be loaded,
    /// declares an unknown custom object, or the window geometry is invalid.
    pub fn load_with_config<P: AsRef<Path>>(
        path: P,
        metrics: &TrainingMetrics,
        config: InferenceConfig,
    ) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SegmentationError::ModelLoadError(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        let builder = Session::builder().map_err(|e| {
            SegmentationError::ModelLoadError(format!("Failed to create session builder: {e}"))
        })?;
        let builder = Self::register_device(builder, config.device.as_ref())?;

        let session = builder
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| {
                SegmentationError::ModelLoadError(format!("Failed to set optimization level: {e}"))
            })?
            .with_intra_threads(config.num_threads)
            .map_err(|e| {
                SegmentationError::ModelLoadError(format!("Failed to set intra-thread count: {e}"))
            })?
            .commit_from_file(path)
            .map_err(|e| SegmentationError::ModelLoadError(format!("Failed to load model: {e}")))?;

        let (metadata, geometry, custom_objects) =
            resolve_metadata(&Self::extract_metadata(&session)?, metrics, &config)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| SegmentationError::ModelLoadError("Model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| SegmentationError::ModelLoadError("Model has no outputs".to_string()))?;

        verbose!(
            "Loaded {} from {} ({} custom objects)",
            metadata.model_name(),
            path.display(),
            custom_objects.len()
        );

        Ok(Self {
            session,
            metadata,
            custom_objects,
            input_name,
            output_name,
            geometry,
            config,
        })
    }

    /// Register the execution provider for the requested device.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn register_device(builder: SessionBuilder, device: Option<&Device>) -> Result<SessionBuilder> {
        match device {
            None | Some(Device::Cpu) => Ok(builder),
            #[cfg(feature = "cuda")]
            Some(Device::Cuda(id)) => builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(*id as i32)
                    .build()])
                .map_err(|e| {
                    SegmentationError::ModelLoadError(format!("Failed to register CUDA EP: {e}"))
                }),
            #[cfg(feature = "tensorrt")]
            Some(Device::TensorRt(id)) => builder
                .with_execution_providers([TensorRTExecutionProvider::default()
                    .with_device_id(*id as i32)
                    .build()])
                .map_err(|e| {
                    SegmentationError::ModelLoadError(format!("Failed to register TensorRT EP: {e}"))
                }),
            #[cfg(feature = "coreml")]
            Some(Device::CoreMl) => builder
                .with_execution_providers([CoreMLExecutionProvider::default().build()])
                .map_err(|e| {
                    SegmentationError::ModelLoadError(format!("Failed to register CoreML EP: {e}"))
                }),
            #[allow(unreachable_patterns)]
            Some(other) => Err(SegmentationError::FeatureNotEnabled(format!(
                "device '{other}' requires building with --features {}",
                other.feature().unwrap_or_default()
            ))),
        }
    }

    /// Extract the custom metadata map from the ONNX model session.
    fn extract_metadata(session: &Session) -> Result<HashMap<String, String>> {
        let model_metadata = session.metadata().map_err(|e| {
            SegmentationError::ModelLoadError(format!("Failed to get model metadata: {e}"))
        })?;

        let mut metadata_map: HashMap<String, String> = HashMap::new();
        for key in &METADATA_KEYS {
            if let Ok(Some(value)) = model_metadata.custom(key) {
                metadata_map.insert((*key).to_string(), value);
            }
        }

        Ok(metadata_map)
    }

    /// Run the ONNX model on one `(1, Ix, Iy, Iz, 1)` patch.
    fn run_inference(&mut self, input: &Array5<f32>) -> Result<(Vec<f32>, Vec<usize>)> {
        let input_contiguous = input.as_standard_layout();

        let input_tensor = TensorRef::from_array_view(&input_contiguous).map_err(|e| {
            SegmentationError::InferenceError(format!("Failed to create input tensor: {e}"))
        })?;

        let inputs = ort::inputs![&self.input_name => input_tensor];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| SegmentationError::InferenceError(format!("Inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            SegmentationError::InferenceError(format!("Output '{}' not found", self.output_name))
        })?;

        let (shape, data) = output.try_extract_tensor::<f32>().map_err(|e| {
            SegmentationError::InferenceError(format!("Failed to extract output: {e}"))
        })?;

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let shape_vec: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let data_vec: Vec<f32> = data.to_vec();

        Ok((data_vec, shape_vec))
    }

    /// Resolved sliding-window geometry.
    #[must_use]
    pub const fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    /// Get the model metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Custom training objects the model declared.
    #[must_use]
    pub fn custom_objects(&self) -> &[CustomObject] {
        &self.custom_objects
    }

    /// Device the session was created for.
    #[must_use]
    pub fn device(&self) -> Device {
        self.config.device.clone().unwrap_or_default()
    }

    /// Tear down the session and free its memory.
    pub fn release(self) {
        verbose!("Releasing {} session", self.metadata.model_name());
        drop(self);
    }
}

/// Parse a model's custom metadata, resolve its window geometry and check
/// every declared custom object against `metrics`.
///
/// # Errors
///
/// Returns an error if the metadata is malformed, the geometry is invalid,
/// or a custom object has no registered implementation.
fn resolve_metadata(
    metadata_map: &HashMap<String, String>,
    metrics: &TrainingMetrics,
    config: &InferenceConfig,
) -> Result<(ModelMetadata, WindowGeometry, Vec<CustomObject>)> {
    let metadata = ModelMetadata::from_onnx_metadata(metadata_map)?;
    let custom_objects = metadata
        .custom_objects
        .iter()
        .map(|name| metrics.resolve(name))
        .collect::<Result<Vec<_>>>()?;
    let geometry = config.geometry(&metadata)?;
    Ok((metadata, geometry, custom_objects))
}

/// Reshape raw model output into a `(1, Ix, Iy, Iz, 1)` patch.
fn output_to_patch(data: Vec<f32>, shape: &[usize]) -> Result<Array5<f32>> {
    if shape.len() != 5 {
        return Err(SegmentationError::InferenceError(format!(
            "expected a rank 5 output, got shape {shape:?}"
        )));
    }
    Ok(ArrayD::from_shape_vec(IxDyn(shape), data)?.into_dimensionality::<Ix5>()?)
}

impl Predictor for UNetModel {
    fn predict(&mut self, patch: &Array5<f32>) -> Result<Array5<f32>> {
        let (data, shape) = self.run_inference(patch)?;
        output_to_patch(data, &shape)
    }
}

impl std::fmt::Debug for UNetModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UNetModel")
            .field("name", &self.metadata.model_name())
            .field("input", &self.input_name)
            .field("output", &self.output_name)
            .field("geometry", &self.geometry)
            .field("custom_objects", &self.custom_objects)
            .finish_non_exhaustive()
    }
}
