//! Price Oracle
//!
//! Source of the external fair price that quoting centers on. Oracle
//! failures are input errors: the cycle loop skips the affected market
//! and tries again next tick, they never trigger recovery.

pub mod binance;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FairPrice, MarketId};

pub use binance::BinanceOracle;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle network error: {0}")]
    Network(String),

    #[error("oracle returned malformed data: {0}")]
    Malformed(String),

    #[error("no recent trades for symbol {symbol}")]
    NoData { symbol: String },

    #[error("no oracle symbol configured for market {0}")]
    UnknownMarket(MarketId),

    #[error("oracle configuration error: {0}")]
    Configuration(String),
}

/// Fair-price feed keyed by market. Implementations map the market to
/// whatever symbol their venue quotes it under.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_fair_price(&self, market_id: MarketId) -> Result<FairPrice, OracleError>;
}
