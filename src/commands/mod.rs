//! CLI command handlers.
//!
//! This module contains the implementation for each CLI subcommand,
//! delegating to the trading engine and configuration layers.

mod check_config;
mod run;

pub use check_config::run_check_config;
pub use run::run_bot;
