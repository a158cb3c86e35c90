pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod logging;
pub mod oracle;
pub mod recovery;
pub mod sequencer;
pub mod trading;
pub mod types;
