//! Run command handler.
//!
//! Wires the configured oracle, connector, and market maker together and
//! hands control to the quote loop.

use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, SessionConfig};
use crate::exchange::{create_connector, TradingEnv};
use crate::oracle::BinanceOracle;
use crate::trading::MarketMaker;

/// Run the market-making loop until the process is stopped.
///
/// # Arguments
/// * `paper` - Use the in-memory paper exchange instead of the gateway
///
/// # Errors
/// Returns error when configuration is invalid, a configured market is
/// not listed on the exchange, or the initial session cannot be built.
pub async fn run_bot(paper: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env = if paper {
        TradingEnv::Paper
    } else {
        TradingEnv::Live
    };
    let config = AppConfig::from_env()?;
    let session = match env {
        TradingEnv::Live => SessionConfig::from_env()?,
        TradingEnv::Paper => SessionConfig::paper(),
    };

    info!(
        env = %env,
        account = %session.account,
        markets = config.markets.len(),
        "starting quotekeeper"
    );

    let oracle = Arc::new(BinanceOracle::from_config(&config)?);
    let exchange_address = session.exchange_address.clone();
    let connector = create_connector(env, session)?;

    let maker = MarketMaker::initialize(config, exchange_address, connector, oracle).await?;
    maker.run().await?;
    Ok(())
}
