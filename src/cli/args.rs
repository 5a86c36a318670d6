// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::PathBuf;

use clap::Parser;

use crate::device::Device;
use crate::geometry::{Coord3, Extent3};
use crate::io::DEFAULT_DATASET;

/// CLI arguments parser.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Apply a 3D U-Net to one block of an N5 volume",
    long_about = None
)]
#[command(after_help = r#"Coordinates are given as x,y,z. The block covers [start, end) and is
written to the same data set path in the output container, which must already exist.

Examples:
    synapse-unet -i raw.n5 -o synapses.n5 -m unet.onnx --start 0,0,0 --end 500,500,500
    synapse-unet -i raw.n5 -d /volumes/raw -o synapses.n5 -m unet.onnx --start 0,0,0 --end 256,256,128
    synapse-unet -i raw.n5 -o synapses.n5 -m unet.onnx --start 0,0,0 --end 500,500,500 --mask mask.n5
    synapse-unet -i raw.n5 -o synapses.n5 -m unet.onnx --start 0,0,0 --end 500,500,500 --device cuda:0"#)]
pub struct Cli {
    /// Input N5 container
    #[arg(short = 'i', long, value_name = "N5")]
    pub input: PathBuf,

    /// Data set path inside the input and output containers
    #[arg(short = 'd', long = "data_set", default_value = DEFAULT_DATASET)]
    pub data_set: String,

    /// Output N5 container
    #[arg(short = 'o', long, value_name = "N5")]
    pub output: PathBuf,

    /// Trained U-Net (ONNX)
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub model: PathBuf,

    /// Inclusive block start
    #[arg(long, value_name = "x1,y1,z1")]
    pub start: Coord3,

    /// Exclusive block end
    #[arg(long, value_name = "x2,y2,z2")]
    pub end: Coord3,

    /// N5 container with a mask; prediction is zeroed where the mask is 0
    #[arg(long, value_name = "N5")]
    pub mask: Option<PathBuf>,

    /// Data set path inside the mask container
    #[arg(long = "mask_data_set", default_value = DEFAULT_DATASET)]
    pub mask_data_set: String,

    /// Window input size override
    #[arg(long = "input_size", value_name = "x,y,z")]
    pub input_size: Option<Extent3>,

    /// Window step override
    #[arg(long, value_name = "x,y,z")]
    pub step: Option<Extent3>,

    /// Device to use (cpu, cuda:0, tensorrt:0, mps, coreml)
    #[arg(long)]
    pub device: Option<Device>,

    /// Intra-op threads for ONNX Runtime (0 lets the runtime decide)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Show verbose output
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 11] = [
        "app", "-i", "raw.n5", "-o", "out.n5", "-m", "unet.onnx", "--start", "0,0,0", "--end",
        "500,500,500",
    ];

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_args_defaults() {
        let args = Cli::parse_from(REQUIRED);
        assert_eq!(args.input, PathBuf::from("raw.n5"));
        assert_eq!(args.output, PathBuf::from("out.n5"));
        assert_eq!(args.model, PathBuf::from("unet.onnx"));
        assert_eq!(args.data_set, "/s0");
        assert_eq!(args.start, Coord3([0, 0, 0]));
        assert_eq!(args.end, Coord3([500, 500, 500]));
        assert!(args.mask.is_none());
        assert_eq!(args.mask_data_set, "/s0");
        assert!(args.input_size.is_none());
        assert!(args.step.is_none());
        assert!(args.device.is_none());
        assert_eq!(args.threads, 0);
        assert!(args.verbose);
    }

    #[test]
    fn test_args_custom() {
        let mut argv = REQUIRED.to_vec();
        argv.extend([
            "-d",
            "/volumes/raw",
            "--mask",
            "mask.n5",
            "--step",
            "16,16,8",
            "--device",
            "cuda:1",
            "--verbose",
            "false",
        ]);
        let args = Cli::parse_from(argv);
        assert_eq!(args.data_set, "/volumes/raw");
        assert_eq!(args.mask, Some(PathBuf::from("mask.n5")));
        assert_eq!(args.step.map(Extent3::zyx), Some([8, 16, 16]));
        assert_eq!(args.device, Some(Device::Cuda(1)));
        assert!(!args.verbose);
    }

    #[test]
    fn test_non_integer_coordinates_rejected() {
        let mut argv = REQUIRED.to_vec();
        argv[8] = "0.5,0,0";
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_missing_required_rejected() {
        assert!(Cli::try_parse_from(["app", "-i", "raw.n5"]).is_err());
    }
}
