//! Command-line interface for quasiqueue.
//!
//! Provides commands for running a queue and inspecting its settings.

mod commands;

pub use commands::{
    default_log_filter, parse_cli, run, run_with_cli, run_with_registry, Cli, Commands, RunArgs,
    SettingsArgs,
};
