// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Integration tests for the block segmentation pipeline

use std::path::Path;

use ndarray::{Array3, Array5};
use synapse_unet::io::{Compression, DataType, DatasetAttributes};
use synapse_unet::{
    BlockRange, Coord3, CustomObject, N5Container, Predictor, Result, SegmentationError,
    TrainingMetrics, WindowGeometry, segment_block,
};

/// Stands in for a trained network: foreground wherever the normalized input
/// is bright.
#[derive(Default)]
struct BrightnessModel {
    calls: usize,
}

impl Predictor for BrightnessModel {
    fn predict(&mut self, patch: &Array5<f32>) -> Result<Array5<f32>> {
        self.calls += 1;
        Ok(patch.mapv(|v| if v > 0.0 { 0.95 } else { 0.05 }))
    }
}

fn dataset(dir: &Path, name: &str, dims: [u64; 3], compression: Compression) -> N5Container {
    let container = N5Container::create(dir.join(name)).unwrap();
    container
        .create_dataset(
            "/s0",
            &DatasetAttributes::new(dims, [16, 16, 16], DataType::Uint8, compression),
        )
        .unwrap();
    container
}

fn full_range(size: u64) -> BlockRange {
    BlockRange::new(Coord3([0, 0, 0]), Coord3([size, size, size])).unwrap()
}

#[test]
fn test_default_geometry_scenario() {
    let geometry = WindowGeometry::default();
    assert_eq!(geometry.gap(), [20, 20, 20]);

    let padded = geometry.padded_shape([100, 100, 100]);
    assert_eq!(padded, [184, 184, 184]);
    assert_eq!(geometry.windows_per_axis(padded), [5, 5, 5]);
    assert_eq!(geometry.num_windows(padded), 125);
}

#[test]
fn test_flat_block_with_full_mask_is_background() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dataset(dir.path(), "raw.n5", [50, 50, 50], Compression::default());
    let mask = dataset(dir.path(), "mask.n5", [50, 50, 50], Compression::Raw);
    let out = dataset(dir.path(), "out.n5", [50, 50, 50], Compression::default());
    let range = full_range(50);
    mask.write_block("/s0", &range, &Array3::from_elem((50, 50, 50), 1))
        .unwrap();

    let image = raw.read_block("/s0", &range).unwrap();
    let mask = mask.read_block("/s0", &range).unwrap();
    let mut model = BrightnessModel::default();
    let geometry = WindowGeometry::new([16, 16, 16], [8, 8, 8]).unwrap();

    let result = segment_block(&image, &mut model, &geometry, Some(&mask)).unwrap();
    assert_eq!(result.prediction.dim(), (50, 50, 50));
    assert_eq!(result.nonzero(), 0);
    assert_eq!(model.calls, result.windows);

    out.write_block("/s0", &range, &result.prediction).unwrap();
    let written = out.read_block("/s0", &range).unwrap();
    assert!(written.iter().all(|&v| v == 0.0));
}

#[test]
fn test_segmentation_round_trips_through_n5() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dataset(dir.path(), "raw.n5", [40, 40, 40], Compression::default());
    let out = dataset(dir.path(), "out.n5", [40, 40, 40], Compression::Raw);

    // bright wherever x >= 25 inside a sub-block that crosses grid boundaries
    let range = BlockRange::new(Coord3([5, 3, 9]), Coord3([37, 30, 33])).unwrap();
    let [dz, dy, dx] = range.shape();
    let image = Array3::from_shape_fn((dz, dy, dx), |(_, _, x)| if x + 5 >= 25 { 200 } else { 10 });
    raw.write_block("/s0", &range, &image).unwrap();

    let block = raw.read_block("/s0", &range).unwrap();
    let geometry = WindowGeometry::new([12, 12, 12], [6, 6, 6]).unwrap();
    let result = segment_block(&block, &mut BrightnessModel::default(), &geometry, None).unwrap();
    out.write_block("/s0", &range, &result.prediction).unwrap();

    let written = out.read_block("/s0", &range).unwrap();
    for ((_, _, x), &v) in written.indexed_iter() {
        let expected = if x + 5 >= 25 { 255.0 } else { 0.0 };
        assert!((v - expected).abs() < f64::EPSILON);
    }

    // voxels outside the block are untouched
    let outside = BlockRange::new(Coord3([0, 0, 0]), Coord3([5, 40, 40])).unwrap();
    assert!(out.read_block("/s0", &outside).unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn test_mask_zeroes_single_voxel() {
    let image = Array3::from_shape_fn((20, 20, 20), |(z, _, _)| if z >= 10 { 1.0 } else { 0.0 });
    let geometry = WindowGeometry::new([8, 8, 8], [4, 4, 4]).unwrap();

    let unmasked = segment_block(&image, &mut BrightnessModel::default(), &geometry, None).unwrap();
    let mut mask = Array3::<f64>::ones((20, 20, 20));
    mask[[15, 3, 7]] = 0.0;
    let masked =
        segment_block(&image, &mut BrightnessModel::default(), &geometry, Some(&mask)).unwrap();

    assert_eq!(unmasked.prediction[[15, 3, 7]], 255);
    assert_eq!(masked.prediction[[15, 3, 7]], 0);
    assert_eq!(masked.nonzero() + 1, unmasked.nonzero());
}

#[test]
fn test_mask_mismatch_rejected_before_prediction() {
    let image = Array3::<f64>::zeros((10, 10, 10));
    let mask = Array3::<f64>::ones((10, 10, 9));
    let mut model = BrightnessModel::default();

    let result = segment_block(&image, &mut model, &WindowGeometry::default(), Some(&mask));
    assert!(matches!(result, Err(SegmentationError::ShapeMismatch(_))));
    assert_eq!(model.calls, 0);
}

#[test]
fn test_training_metrics_registry() {
    let metrics = TrainingMetrics::default();
    for object in CustomObject::ALL {
        assert_eq!(metrics.resolve(object.name()).unwrap(), object);
    }
    assert!(matches!(
        metrics.resolve("dice_loss"),
        Err(SegmentationError::ModelLoadError(_))
    ));
}
