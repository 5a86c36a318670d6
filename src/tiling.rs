// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Sliding-window tiling and stitching.
//!
//! Windows of the model's input size are cut from the padded block on a
//! regular grid, predicted one at a time, and the central `step`-sized part
//! of every prediction is written into the output volume. Neighbouring
//! windows therefore write disjoint regions and no overlap averaging is
//! needed.

use ndarray::{Array3, Array5, Axis, s};

use crate::error::{Result, SegmentationError};
use crate::geometry::WindowGeometry;
use crate::verbose;

/// Anything that turns a single-channel volumetric patch into per-voxel
/// probabilities.
///
/// Patches are shaped `(1, Ix, Iy, Iz, 1)` and the returned batch must have
/// the same shape.
pub trait Predictor {
    /// Run inference on one patch.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to evaluate the patch.
    fn predict(&mut self, patch: &Array5<f32>) -> Result<Array5<f32>>;
}

/// Predict every window of a padded block and stitch the central regions.
///
/// Returns a probability volume with the padded block's shape. Voxels not
/// covered by any window's central region stay at zero.
///
/// # Errors
///
/// Returns an error if the predictor fails or returns a batch whose shape
/// differs from the patch shape.
#[allow(clippy::cast_possible_truncation)]
pub fn stitch<P: Predictor>(
    padded: &Array3<f64>,
    geometry: &WindowGeometry,
    predictor: &mut P,
) -> Result<Array3<f32>> {
    let (p0, p1, p2) = padded.dim();
    let padded_shape = [p0, p1, p2];
    let input = geometry.input_size();
    let step = geometry.step();
    let gap = geometry.gap();

    let total = geometry.num_windows(padded_shape);
    let patch_shape = (1, input[0], input[1], input[2], 1);
    let mut prediction = Array3::<f32>::zeros(padded_shape);

    for (index, [row, col, vol]) in geometry.window_origins(padded_shape).enumerate() {
        let window = padded.slice(s![
            row..row + input[0],
            col..col + input[1],
            vol..vol + input[2]
        ]);

        let mut patch = Array5::<f32>::zeros(patch_shape);
        patch
            .index_axis_mut(Axis(0), 0)
            .index_axis_move(Axis(3), 0)
            .zip_mut_with(&window, |dst, &src| *dst = src as f32);

        let output = predictor.predict(&patch)?;
        if output.dim() != patch_shape {
            return Err(SegmentationError::InferenceError(format!(
                "model returned shape {:?}, expected {:?}",
                output.shape(),
                patch_shape
            )));
        }

        let center = output.slice(s![
            0,
            gap[0]..gap[0] + step[0],
            gap[1]..gap[1] + step[1],
            gap[2]..gap[2] + step[2],
            0
        ]);
        prediction
            .slice_mut(s![
                row + gap[0]..row + gap[0] + step[0],
                col + gap[1]..col + gap[1] + step[1],
                vol + gap[2]..vol + gap[2] + step[2]
            ])
            .assign(&center);

        verbose!("window {}/{total} at ({row}, {col}, {vol})", index + 1);
    }

    Ok(prediction)
}
