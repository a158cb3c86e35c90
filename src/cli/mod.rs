//! CLI argument parsing using clap.
//!
//! This module defines the command-line interface for quotekeeper,
//! including all subcommands and their arguments.

use clap::{Parser, Subcommand};

/// Quotekeeper - automated quote maintenance for on-chain order books
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the market-making loop
    Run {
        /// Run against the in-memory paper exchange (no gateway, no keys)
        #[arg(long, default_value_t = false)]
        paper: bool,
    },

    /// Load the effective configuration, print it, and exit
    CheckConfig,
}
