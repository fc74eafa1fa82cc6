//! Command-line interface for parallel-analysis.
//!
//! Provides commands for running a batch directly and for submitting,
//! inspecting and listing admitted jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
