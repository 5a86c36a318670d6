// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Post-processing of stitched U-Net predictions.
//!
//! Probabilities are binarized at a fixed threshold, the padding added
//! before inference is cropped away, and an optional validity mask zeroes
//! predictions outside the region of interest.

use ndarray::{Array3, ArrayView3, Zip, s};

use crate::error::{Result, SegmentationError};
use crate::geometry::{Shape3, WindowGeometry};

/// Decision threshold applied to predicted probabilities.
pub const THRESHOLD: f32 = 0.5;

/// Value written for foreground voxels.
pub const FOREGROUND: u8 = 255;

/// Binarize a volume: values `>= 0.5` become [`FOREGROUND`], everything else
/// (including `NaN`) becomes 0.
///
/// Works on probabilities as well as on already binary `u8` volumes, on which
/// it is a no-op.
#[must_use]
pub fn binarize<A>(volume: &Array3<A>) -> Array3<u8>
where
    A: Copy + Into<f32>,
{
    volume.mapv(|v| if v.into() >= THRESHOLD { FOREGROUND } else { 0 })
}

/// Crop a padded volume back to the unpadded block extent.
///
/// This undoes [`crate::preprocessing::pad`]: each axis keeps
/// `gap..gap + shape`.
///
/// # Errors
///
/// Returns [`SegmentationError::ShapeMismatch`] if the volume is not the
/// padded shape of `shape` under `geometry`.
pub fn crop_to_original<A: Clone>(
    padded: &Array3<A>,
    geometry: &WindowGeometry,
    shape: Shape3,
) -> Result<Array3<A>> {
    let (d0, d1, d2) = padded.dim();
    let expected = geometry.padded_shape(shape);
    if [d0, d1, d2] != expected {
        return Err(SegmentationError::ShapeMismatch(format!(
            "padded volume is {:?}, expected {expected:?} for block {shape:?}",
            [d0, d1, d2]
        )));
    }

    let gap = geometry.gap();
    Ok(padded
        .slice(s![
            gap[0]..gap[0] + shape[0],
            gap[1]..gap[1] + shape[1],
            gap[2]..gap[2] + shape[2]
        ])
        .to_owned())
}

/// Zero every prediction where the mask is zero.
///
/// Any non-zero mask value counts as inside.
///
/// # Errors
///
/// Returns [`SegmentationError::ShapeMismatch`] if the mask and prediction
/// shapes differ.
pub fn apply_mask(prediction: &mut Array3<u8>, mask: ArrayView3<'_, f64>) -> Result<()> {
    if prediction.shape() != mask.shape() {
        return Err(SegmentationError::ShapeMismatch(format!(
            "mask {:?} does not match prediction {:?}",
            mask.shape(),
            prediction.shape()
        )));
    }

    Zip::from(prediction).and(mask).for_each(|p, &m| {
        if m == 0.0 {
            *p = 0;
        }
    });
    Ok(())
}

/// Threshold, crop and mask a stitched probability volume.
///
/// # Errors
///
/// Returns an error if the volume or mask shapes do not match the block.
pub fn postprocess(
    stitched: &Array3<f32>,
    geometry: &WindowGeometry,
    shape: Shape3,
    mask: Option<ArrayView3<'_, f64>>,
) -> Result<Array3<u8>> {
    let binary = binarize(stitched);
    let mut cropped = crop_to_original(&binary, geometry, shape)?;
    if let Some(mask) = mask {
        apply_mask(&mut cropped, mask)?;
    }
    Ok(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::pad;

    #[test]
    fn test_binarize_threshold() {
        let volume =
            Array3::from_shape_vec((1, 1, 5), vec![0.0_f32, 0.49, 0.5, 0.9, f32::NAN]).unwrap();
        let binary = binarize(&volume);
        assert_eq!(binary.as_slice().unwrap(), &[0, 0, 255, 255, 0]);
    }

    #[test]
    fn test_binarize_is_idempotent() {
        let volume = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| ((i + j + k) % 3) as f32 / 2.0);
        let once = binarize(&volume);
        let twice = binarize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_pad_then_crop_restores_shape() {
        for (input, step) in [([64, 64, 64], [24, 24, 24]), ([6, 8, 10], [2, 8, 4])] {
            let geometry = WindowGeometry::new(input, step).unwrap();
            let block = Array3::from_shape_fn((7, 5, 3), |(i, j, k)| (i + j + k) as f64);
            let padded = pad(&block, &geometry);
            let cropped = crop_to_original(&padded, &geometry, [7, 5, 3]).unwrap();
            assert_eq!(cropped, block);
        }
    }

    #[test]
    fn test_crop_rejects_wrong_shape() {
        let geometry = WindowGeometry::default();
        let volume = Array3::<u8>::zeros((10, 10, 10));
        let result = crop_to_original(&volume, &geometry, [5, 5, 5]);
        assert!(matches!(result, Err(SegmentationError::ShapeMismatch(_))));
    }

    #[test]
    fn test_mask_zeroes_single_voxel() {
        let mut prediction = Array3::<u8>::from_elem((3, 3, 3), FOREGROUND);
        prediction[[0, 0, 0]] = 0;
        let unmasked = prediction.clone();

        let mut mask = Array3::<f64>::from_elem((3, 3, 3), 7.0);
        mask[[1, 2, 1]] = 0.0;
        apply_mask(&mut prediction, mask.view()).unwrap();

        for (idx, &v) in prediction.indexed_iter() {
            if idx == (1, 2, 1) {
                assert_eq!(v, 0);
            } else {
                assert_eq!(v, unmasked[idx]);
            }
        }
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let mut prediction = Array3::<u8>::zeros((2, 2, 2));
        let mask = Array3::<f64>::ones((2, 2, 3));
        assert!(apply_mask(&mut prediction, mask.view()).is_err());
    }

    #[test]
    fn test_postprocess_output() {
        let geometry = WindowGeometry::new([4, 4, 4], [2, 2, 2]).unwrap();
        let stitched = Array3::<f32>::from_elem(geometry.padded_shape([2, 3, 4]), 0.75);
        let out = postprocess(&stitched, &geometry, [2, 3, 4], None).unwrap();
        assert_eq!(out.dim(), (2, 3, 4));
        assert!(out.iter().all(|&v| v == FOREGROUND));
    }
}
