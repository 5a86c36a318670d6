// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Output of a block segmentation.

use ndarray::Array3;

use crate::postprocessing::FOREGROUND;

/// Timing information for a block segmentation (in milliseconds).
#[derive(Debug, Clone, Default)]
pub struct Speed {
    /// Time spent normalizing and padding.
    pub preprocess: Option<f64>,
    /// Time spent predicting and stitching windows.
    pub inference: Option<f64>,
    /// Time spent thresholding, cropping and masking.
    pub postprocess: Option<f64>,
}

impl Speed {
    /// Create a new Speed instance with all timings.
    ///
    /// # Arguments
    ///
    /// * `preprocess` - Time in milliseconds.
    /// * `inference` - Time in milliseconds.
    /// * `postprocess` - Time in milliseconds.
    #[must_use]
    pub const fn new(preprocess: f64, inference: f64, postprocess: f64) -> Self {
        Self {
            preprocess: Some(preprocess),
            inference: Some(inference),
            postprocess: Some(postprocess),
        }
    }

    /// Sum of preprocess, inference, and postprocess times in milliseconds.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.preprocess.unwrap_or(0.0)
            + self.inference.unwrap_or(0.0)
            + self.postprocess.unwrap_or(0.0)
    }
}

/// Binary segmentation of one block.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Foreground (255) / background (0) volume with the input block's shape.
    pub prediction: Array3<u8>,
    /// Number of windows the model was run on.
    pub windows: usize,
    /// Timing breakdown.
    pub speed: Speed,
}

impl SegmentationResult {
    /// Number of non-zero voxels.
    #[must_use]
    pub fn nonzero(&self) -> usize {
        self.prediction.iter().filter(|&&v| v != 0).count()
    }

    /// Fraction of voxels marked foreground.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn foreground_fraction(&self) -> f64 {
        if self.prediction.is_empty() {
            return 0.0;
        }
        let foreground = self.prediction.iter().filter(|&&v| v == FOREGROUND).count();
        foreground as f64 / self.prediction.len() as f64
    }
}
