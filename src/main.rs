// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! `synapse-unet` command-line entry point.

use std::process::ExitCode;

use clap::Parser;

use synapse_unet::cli::args::Cli;
use synapse_unet::cli::logging::set_verbose;
use synapse_unet::cli::predict::run_prediction;
use synapse_unet::error;

fn main() -> ExitCode {
    let args = Cli::parse();
    set_verbose(args.verbose);

    match run_prediction(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
