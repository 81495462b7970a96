//! Command-line interface: argument definitions and output formatting.

pub mod commands;
pub mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
