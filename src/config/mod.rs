//! Typed configuration with explicit defaults.
//!
//! Two layers: `AppConfig` carries tunables (oracle endpoint, fee ceiling,
//! cadence, per-market policies) with library defaults overridable from the
//! environment, and `SessionConfig` carries the chain session parameters
//! that are required for live trading and read strictly from the
//! environment.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountId, MarketId, TokenId};

/// Default transaction fee ceiling passed through to every chain call.
pub const DEFAULT_MAX_FEE: u128 = 9_122_241_938_326_667;

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: '{value}'")]
    InvalidVar { name: &'static str, value: String },

    #[error("failed to read markets file '{path}': {source}")]
    MarketsFileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse markets file '{path}': {source}")]
    MarketsFileParse {
        path: String,
        source: serde_json::Error,
    },

    #[error("market {0} has no policy configured")]
    UnknownMarket(MarketId),

    #[error("configured market {0} is not listed on the exchange")]
    MarketNotListed(MarketId),
}

/// Per-market quoting thresholds. One per market id; drives every filter
/// and creation decision in reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Relative distance from fair price at which new quotes are placed.
    pub target_relative_distance: Decimal,
    /// Beyond this relative distance the best order counts as deep and is
    /// replaced.
    pub max_relative_distance: Decimal,
    /// Inside this relative distance an order is too close and is canceled.
    pub min_relative_distance: Decimal,
    /// Notional per new order, in the exchange's fixed-point scale
    /// (e.g. 200 quote units on an 18-decimal market = 200e18).
    pub order_dollar_size: Decimal,
    /// Below this quote-currency value (human units) a resting order is
    /// not worth keeping.
    pub minimal_remaining_quote_value: Decimal,
    /// Hard cap on resting orders per side after reconciliation.
    pub max_orders_per_side: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            target_relative_distance: dec!(0.001),
            max_relative_distance: dec!(0.003),
            min_relative_distance: dec!(0.0005),
            order_dollar_size: dec!(200000000000000000000),
            minimal_remaining_quote_value: dec!(100),
            max_orders_per_side: 3,
        }
    }
}

/// Policy plus the oracle feed symbol for one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEntry {
    /// Symbol queried on the trade feed (e.g. "ETHUSDC").
    pub oracle_symbol: String,
    #[serde(flatten)]
    pub policy: Policy,
}

/// Known token with its on-chain address and native decimals, used to
/// render claim amounts in human units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: TokenId,
    pub decimals: u32,
}

/// Application tunables with explicit defaults. Every field can be
/// overridden from the environment; the per-market table can also be
/// replaced wholesale from a JSON file via `QK_MARKETS_FILE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the trade feed used as the fair-price source.
    pub oracle_url: String,
    /// Fee ceiling for normal-path transactions.
    pub max_fee: u128,
    /// Seconds between reconciliation cycles.
    pub poll_interval_secs: u64,
    /// Seconds to wait after a recovery drain before re-querying orders.
    pub settle_wait_secs: u64,
    /// Known tokens (for claim logging).
    pub tokens: Vec<TokenInfo>,
    /// Per-market policy table keyed by market id.
    pub markets: BTreeMap<u64, MarketEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut markets = BTreeMap::new();
        markets.insert(
            1,
            MarketEntry {
                oracle_symbol: "ETHUSDC".to_string(),
                policy: Policy::default(),
            },
        );
        Self {
            oracle_url: "https://data-api.binance.vision".to_string(),
            max_fee: DEFAULT_MAX_FEE,
            poll_interval_secs: 10,
            settle_wait_secs: 10,
            tokens: vec![
                TokenInfo {
                    symbol: "ETH".to_string(),
                    address: TokenId::new(
                        "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
                    ),
                    decimals: 18,
                },
                TokenInfo {
                    symbol: "USDC".to_string(),
                    address: TokenId::new(
                        "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8",
                    ),
                    decimals: 6,
                },
                TokenInfo {
                    symbol: "STRK".to_string(),
                    address: TokenId::new(
                        "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d",
                    ),
                    decimals: 18,
                },
            ],
            markets,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with any environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(url) = std::env::var("QK_ORACLE_URL") {
            cfg.oracle_url = url;
        }
        if let Some(fee) = parse_env("QK_MAX_FEE")? {
            cfg.max_fee = fee;
        }
        if let Some(secs) = parse_env("QK_POLL_INTERVAL_SECS")? {
            cfg.poll_interval_secs = secs;
        }
        if let Some(secs) = parse_env("QK_SETTLE_WAIT_SECS")? {
            cfg.settle_wait_secs = secs;
        }
        if let Ok(path) = std::env::var("QK_MARKETS_FILE") {
            cfg.markets = load_markets_file(&path)?;
        }

        Ok(cfg)
    }

    /// Policy for a market, or `ConfigError::UnknownMarket`.
    pub fn market_entry(&self, market_id: MarketId) -> Result<&MarketEntry, ConfigError> {
        self.markets
            .get(&market_id.0)
            .ok_or(ConfigError::UnknownMarket(market_id))
    }

    /// Market ids this instance quotes, in stable order.
    pub fn market_ids(&self) -> Vec<MarketId> {
        self.markets.keys().copied().map(MarketId).collect()
    }

    /// Fee ceiling used while draining orders during recovery.
    pub fn recovery_max_fee(&self) -> u128 {
        self.max_fee / 10
    }

    /// Look up a known token by address.
    pub fn token_info(&self, address: &TokenId) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| &t.address == address)
    }
}

/// Chain session parameters. Required for live trading; read strictly
/// from the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Trading account address.
    pub account: AccountId,
    /// Exchange contract address (also the approval spender).
    pub exchange_address: AccountId,
    /// Chain gateway base URL.
    pub gateway_url: String,
}

impl SessionConfig {
    /// Create session config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let account = std::env::var("QK_ACCOUNT_ADDRESS")
            .map_err(|_| ConfigError::MissingVar("QK_ACCOUNT_ADDRESS"))?;
        let exchange_address = std::env::var("QK_EXCHANGE_ADDRESS")
            .map_err(|_| ConfigError::MissingVar("QK_EXCHANGE_ADDRESS"))?;
        let gateway_url = std::env::var("QK_GATEWAY_URL")
            .map_err(|_| ConfigError::MissingVar("QK_GATEWAY_URL"))?;

        Ok(Self {
            account: AccountId::new(account),
            exchange_address: AccountId::new(exchange_address),
            gateway_url,
        })
    }

    /// Placeholder session for paper trading; no chain connection is made.
    pub fn paper() -> Self {
        Self {
            account: AccountId::new("0xpaper"),
            exchange_address: AccountId::new("0xpaper-exchange"),
            gateway_url: String::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn load_markets_file(path: &str) -> Result<BTreeMap<u64, MarketEntry>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::MarketsFileRead {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::MarketsFileParse {
        path: path.to_string(),
        source,
    })
}
