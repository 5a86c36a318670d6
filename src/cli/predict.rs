// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::time::Instant;

use crate::cli::args::Cli;
use crate::cli::logging::format_speed;
use crate::error::Result;
use crate::geometry::BlockRange;
use crate::inference::InferenceConfig;
use crate::io::N5Container;
use crate::metrics::TrainingMetrics;
use crate::model::UNetModel;
use crate::segment::{check_mask, segment_block};
use crate::{info, section, success, verbose, warn};

/// Build the inference configuration from the command line overrides.
fn inference_config(args: &Cli) -> InferenceConfig {
    let mut config = InferenceConfig::new().with_threads(args.threads);
    if let Some(input_size) = args.input_size {
        config = config.with_input_size(input_size.zyx());
    }
    if let Some(step) = args.step {
        config = config.with_step(step.zyx());
    }
    if let Some(device) = &args.device {
        config = config.with_device(device.clone());
    }
    config
}

/// Segment one block and write it to the output container.
///
/// # Errors
///
/// Returns the first error from reading, model loading, inference or
/// writing. Nothing is written unless segmentation succeeds.
#[allow(clippy::cast_precision_loss)]
pub fn run_prediction(args: &Cli) -> Result<()> {
    let range = BlockRange::new(args.start, args.end)?;

    section!("Reading block {range}");
    let image = N5Container::open(&args.input)?.read_block(&args.data_set, &range)?;
    verbose!(
        "{}{} -> {:?} voxels",
        args.input.display(),
        args.data_set,
        image.shape()
    );

    if let Some(&first) = image.first() {
        if image.iter().all(|&v| v.to_bits() == first.to_bits()) {
            warn!("block is constant ({first}), normalized values will not be finite");
        }
    }

    let mask = match &args.mask {
        Some(path) => {
            let mask = N5Container::open(path)?.read_block(&args.mask_data_set, &range)?;
            verbose!("mask {}{}", path.display(), args.mask_data_set);
            Some(mask)
        }
        None => None,
    };
    check_mask(&image, mask.as_ref())?;

    let output = N5Container::open(&args.output)?;
    N5Container::check_range(&output.dataset_attributes(&args.data_set)?, &range)?;

    info!("Applying 3D U-Net...");
    let start_time = Instant::now();

    info!("Doing prediction using 3D U-Net...");
    let mut model = UNetModel::load_with_config(
        &args.model,
        &TrainingMetrics::default(),
        inference_config(args),
    )?;
    let geometry = model.geometry();
    verbose!(
        "{} on {}, input size {:?}, step {:?}",
        model.metadata().model_name(),
        model.device(),
        geometry.input_size(),
        geometry.step()
    );

    info!("Running U-Net...");
    let result = segment_block(&image, &mut model, &geometry, mask.as_ref());
    model.release();
    let result = result?;

    success!("U-Net DONE!");
    info!(
        "Non-zero: {} ({:.2}% foreground)",
        result.nonzero(),
        result.foreground_fraction() * 100.0
    );
    verbose!(
        "{} windows, {}",
        result.windows,
        format_speed(&result.speed)
    );
    info!(
        "DONE!! Running time is {} seconds",
        start_time.elapsed().as_secs_f64()
    );

    section!("Writing block {range}");
    output.write_block(&args.data_set, &range, &result.prediction)?;
    verbose!("{}{}", args.output.display(), args.data_set);
    success!("DONE!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::error::SegmentationError;
    use crate::geometry::Coord3;
    use crate::io::{Compression, DataType, DatasetAttributes};
    use clap::Parser;

    fn container_with(dir: &std::path::Path, name: &str, data_type: DataType) -> N5Container {
        let container = N5Container::create(dir.join(name)).unwrap();
        container
            .create_dataset(
                "/s0",
                &DatasetAttributes::new([8, 8, 8], [4, 4, 4], data_type, Compression::Raw),
            )
            .unwrap();
        container
    }

    fn cli(dir: &std::path::Path, extra: &[&str]) -> Cli {
        let input = dir.join("raw.n5");
        let output = dir.join("out.n5");
        let model = dir.join("missing.onnx");
        let mut argv = vec![
            "app".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-o".to_string(),
            output.display().to_string(),
            "-m".to_string(),
            model.display().to_string(),
            "--start".to_string(),
            "0,0,0".to_string(),
            "--end".to_string(),
            "8,8,8".to_string(),
            "--verbose".to_string(),
            "false".to_string(),
        ];
        argv.extend(extra.iter().map(ToString::to_string));
        Cli::parse_from(argv)
    }

    #[test]
    fn test_inference_config_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(
            dir.path(),
            &["--input_size", "32,32,16", "--threads", "2", "--device", "cpu"],
        );
        let config = inference_config(&args);
        assert_eq!(config.input_size, Some([16, 32, 32]));
        assert_eq!(config.step, None);
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.device, Some(Device::Cpu));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = cli(dir.path(), &[]);
        args.start = Coord3([4, 0, 0]);
        args.end = Coord3([2, 8, 8]);
        assert!(matches!(
            run_prediction(&args),
            Err(SegmentationError::GeometryError(_))
        ));
    }

    #[test]
    fn test_missing_output_fails_before_model_load() {
        let dir = tempfile::tempdir().unwrap();
        container_with(dir.path(), "raw.n5", DataType::Uint8);
        let args = cli(dir.path(), &[]);
        assert!(matches!(
            run_prediction(&args),
            Err(SegmentationError::StoreError(_))
        ));
    }

    #[test]
    fn test_output_too_small_fails_before_model_load() {
        let dir = tempfile::tempdir().unwrap();
        container_with(dir.path(), "raw.n5", DataType::Uint8);
        let output = N5Container::create(dir.path().join("out.n5")).unwrap();
        output
            .create_dataset(
                "/s0",
                &DatasetAttributes::new([8, 8, 6], [4, 4, 4], DataType::Uint8, Compression::Raw),
            )
            .unwrap();

        // the model path doesn't exist, so reaching the loader would be a load error
        let args = cli(dir.path(), &[]);
        assert!(matches!(
            run_prediction(&args),
            Err(SegmentationError::StoreError(_))
        ));
    }

    #[test]
    fn test_missing_model_reported() {
        let dir = tempfile::tempdir().unwrap();
        container_with(dir.path(), "raw.n5", DataType::Uint8);
        container_with(dir.path(), "out.n5", DataType::Uint8);
        let args = cli(dir.path(), &[]);
        assert!(matches!(
            run_prediction(&args),
            Err(SegmentationError::ModelLoadError(_))
        ));
    }

    #[test]
    fn test_mask_smaller_than_block_rejected() {
        let dir = tempfile::tempdir().unwrap();
        container_with(dir.path(), "raw.n5", DataType::Uint8);
        container_with(dir.path(), "out.n5", DataType::Uint8);
        let mask = N5Container::create(dir.path().join("mask.n5")).unwrap();
        mask.create_dataset(
            "/s0",
            &DatasetAttributes::new([8, 8, 4], [4, 4, 4], DataType::Uint8, Compression::Raw),
        )
        .unwrap();

        let mask_path = dir.path().join("mask.n5").display().to_string();
        let args = cli(dir.path(), &["--mask", &mask_path]);
        // the mask data set is too small for the block, so reading it fails
        assert!(run_prediction(&args).is_err());
    }
}
