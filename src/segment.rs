// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Block segmentation pipeline.
//!
//! Normalize, pad, predict window by window, then threshold, crop and mask.
//! The model is any [`Predictor`], so the pipeline runs the same with an
//! ONNX Runtime session or a test double.

use std::time::Instant;

use ndarray::Array3;

use crate::error::{Result, SegmentationError};
use crate::geometry::WindowGeometry;
use crate::postprocessing::postprocess;
use crate::preprocessing::{normalize, pad};
use crate::results::{SegmentationResult, Speed};
use crate::tiling::{Predictor, stitch};
use crate::verbose;

/// Reject a mask whose shape differs from the image.
///
/// # Errors
///
/// Returns [`SegmentationError::ShapeMismatch`] on mismatch.
pub fn check_mask(image: &Array3<f64>, mask: Option<&Array3<f64>>) -> Result<()> {
    match mask {
        Some(mask) if mask.shape() != image.shape() => Err(SegmentationError::ShapeMismatch(
            format!(
                "Mask and image shapes do not match! mask {:?}, image {:?}",
                mask.shape(),
                image.shape()
            ),
        )),
        _ => Ok(()),
    }
}

/// Segment one dense block.
///
/// Returns a `u8` volume with the block's shape where foreground voxels are
/// 255. A constant block normalizes to non-finite values, which are passed
/// to the model unchanged.
///
/// # Errors
///
/// Returns an error if the mask shape differs from the image or the
/// predictor fails.
pub fn segment_block<P: Predictor>(
    image: &Array3<f64>,
    predictor: &mut P,
    geometry: &WindowGeometry,
    mask: Option<&Array3<f64>>,
) -> Result<SegmentationResult> {
    check_mask(image, mask)?;
    let (d0, d1, d2) = image.dim();
    let shape = [d0, d1, d2];

    let start_preprocess = Instant::now();
    let padded = pad(&normalize(image), geometry);
    let preprocess_time = start_preprocess.elapsed().as_secs_f64() * 1000.0;

    let (p0, p1, p2) = padded.dim();
    let windows = geometry.num_windows([p0, p1, p2]);
    verbose!(
        "block {shape:?} padded to {:?}, gap {:?}, {windows} windows",
        [p0, p1, p2],
        geometry.gap()
    );

    let start_inference = Instant::now();
    let stitched = stitch(&padded, geometry, predictor)?;
    let inference_time = start_inference.elapsed().as_secs_f64() * 1000.0;
    drop(padded);

    let start_postprocess = Instant::now();
    let prediction = postprocess(&stitched, geometry, shape, mask.map(Array3::view))?;
    let postprocess_time = start_postprocess.elapsed().as_secs_f64() * 1000.0;

    Ok(SegmentationResult {
        prediction,
        windows,
        speed: Speed::new(preprocess_time, inference_time, postprocess_time),
    })
}
