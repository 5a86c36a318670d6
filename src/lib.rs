// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Synapse U-Net
//!
//! Applies a pretrained 3D U-Net to one block of a large volumetric image
//! stored in an [N5](https://github.com/saalfeldlab/n5) container and writes
//! a binary synapse segmentation of the same block to an output container.
//!
//! The block is normalized to zero mean and unit variance, zero padded, and
//! predicted window by window. Each window contributes only its central
//! `step` region to the stitched result, which is then thresholded at 0.5,
//! cropped back to the block and optionally masked.
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use synapse_unet::{BlockRange, Coord3, N5Container, TrainingMetrics, UNetModel, segment_block};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let range = BlockRange::new(Coord3([0, 0, 0]), Coord3([500, 500, 500]))?;
//!     let image = N5Container::open("raw.n5")?.read_block("/s0", &range)?;
//!
//!     let mut model = UNetModel::load("unet.onnx", &TrainingMetrics::default())?;
//!     let geometry = model.geometry();
//!     let result = segment_block(&image, &mut model, &geometry, None)?;
//!     model.release();
//!
//!     println!("Non-zero: {}", result.nonzero());
//!     N5Container::open("synapses.n5")?.write_block("/s0", &range, &result.prediction)?;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! synapse-unet -i raw.n5 -d /s0 -o synapses.n5 -m unet.onnx --start 0,0,0 --end 500,500,500
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`geometry`] | Coordinates, block ranges and window geometry ([`WindowGeometry`]) |
//! | [`preprocessing`] | Normalization and padding |
//! | [`tiling`] | Sliding-window prediction and stitching ([`Predictor`]) |
//! | [`postprocessing`] | Threshold, crop and mask |
//! | [`segment`] | The full block pipeline ([`segment_block`]) |
//! | [`model`] | ONNX Runtime U-Net ([`UNetModel`]) |
//! | [`metrics`] | Masked training metrics ([`TrainingMetrics`]) |
//! | [`io`] | N5 block reading and writing ([`N5Container`]) |
//! | [`error`] | Error types ([`SegmentationError`], [`Result`]) |
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `cuda` | NVIDIA CUDA acceleration |
//! | `tensorrt` | NVIDIA `TensorRT` optimization |
//! | `coreml` | Apple `CoreML` (macOS/iOS) |

// Modules
pub mod cli;
pub mod device;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod io;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod postprocessing;
pub mod preprocessing;
pub mod results;
pub mod segment;
pub mod tiling;

// Re-export main types for convenience
pub use device::Device;
pub use error::{Result, SegmentationError};
pub use geometry::{BlockRange, Coord3, WindowGeometry};
pub use inference::InferenceConfig;
pub use io::N5Container;
pub use metadata::ModelMetadata;
pub use metrics::{CustomObject, Metric, TrainingMetrics};
pub use model::UNetModel;
pub use results::{SegmentationResult, Speed};
pub use segment::segment_block;
pub use tiling::Predictor;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
