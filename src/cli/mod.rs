// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! CLI module for segmenting a block.
//!
//! This module contains the command-line interface logic, including argument parsing,
//! console logging and the block segmentation command.

// Modules
/// CLI arguments.
pub mod args;

/// Console logging macros and the global verbosity flag.
pub mod logging;

/// Block segmentation command.
pub mod predict;
