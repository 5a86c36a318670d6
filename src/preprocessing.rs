// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Block preprocessing for U-Net inference.
//!
//! This module normalizes a dense block to zero mean and unit variance and
//! surrounds it with a zero border wide enough for every sliding window to
//! stay inside the padded array.

use ndarray::{Array3, s};

use crate::geometry::WindowGeometry;

/// Rescale a block to zero mean and unit variance.
///
/// Mean and (population) standard deviation are taken over all samples.
///
/// A constant block has a standard deviation of zero, so every output sample
/// is `NaN` (or infinite if the numerator is non-zero). This is not guarded
/// against; the caller sees the non-finite values.
#[must_use]
pub fn normalize(block: &Array3<f64>) -> Array3<f64> {
    let mean = block.mean().unwrap_or(f64::NAN);
    let std = block.std(0.0);
    block.mapv(|v| (v - mean) / std)
}

/// Pad a normalized block for sliding-window inference.
///
/// The result has shape `shape + gap + input_size` per axis, with the block
/// copied in at offset `gap` and zeros everywhere else.
#[must_use]
pub fn pad(block: &Array3<f64>, geometry: &WindowGeometry) -> Array3<f64> {
    let (d0, d1, d2) = block.dim();
    let gap = geometry.gap();
    let padded_shape = geometry.padded_shape([d0, d1, d2]);

    let mut padded = Array3::<f64>::zeros(padded_shape);
    padded
        .slice_mut(s![
            gap[0]..gap[0] + d0,
            gap[1]..gap[1] + d1,
            gap[2]..gap[2] + d2
        ])
        .assign(block);
    padded
}
