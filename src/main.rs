use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use quotekeeper::cli::{Cli, Commands};
use quotekeeper::commands::{run_bot, run_check_config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.verbose);

    match cli.command {
        Commands::Run { paper } => run_bot(paper).await?,
        Commands::CheckConfig => run_check_config()?,
    }

    Ok(())
}

fn init_tracing(verbose: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbose))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
