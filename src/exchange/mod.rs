//! Exchange Abstraction Layer
//!
//! Exchange-agnostic traits and factories for the chain RPC boundary.
//! New venues can be added by implementing `ExchangeClient` without
//! touching reconciliation, sequencing, or recovery logic.

pub mod gateway;
pub mod paper;

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::types::{AccountId, MarketConfig, MarketId, OrderId, RestingOrder, Side, TokenId};

pub use gateway::{GatewayClient, GatewayConnector};
pub use paper::{PaperConnector, PaperExchange};

/// Hash of a transaction accepted on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxId(pub String);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by exchange clients, classified the way recovery
/// consumes them.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// RPC unreachable, bad gateway, connection reset.
    #[error("network error: {0}")]
    Network(String),

    /// The chain accepted the request but rejected the transaction
    /// (stale nonce, failed validation, reverted call).
    #[error("transaction rejected: {reason}")]
    Rejected { reason: String },

    /// Transient venue-side pushback; safe to retry without a new session.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Bad or missing client configuration; the session cannot be built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything the client could not classify.
    #[error("{0}")]
    Other(String),
}

impl ExchangeError {
    /// Wrap an opaque error from an underlying SDK or transport.
    pub fn from_boxed(e: Box<dyn Error + Send + Sync>) -> Self {
        ExchangeError::Other(e.to_string())
    }

    /// Create a chain-rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        ExchangeError::Rejected {
            reason: reason.into(),
        }
    }

    /// Transport/session failure (RPC unreachable, bad gateway).
    pub fn is_transport(&self) -> bool {
        matches!(self, ExchangeError::Network(_))
    }

    /// Chain-level rejection (stale nonce, failed validation).
    pub fn is_chain_rejection(&self) -> bool {
        matches!(self, ExchangeError::Rejected { .. })
    }

    /// Whether recovery must rebuild the session before draining.
    /// Transient throttling keeps the session; transport faults and chain
    /// rejections (the nonce may be stale) do not.
    pub fn requires_new_session(&self) -> bool {
        self.is_transport() || self.is_chain_rejection()
    }
}

/// Chain RPC boundary. Every transaction-returning method resolves only
/// once the transaction is accepted on chain, so callers may issue the
/// operation at the next nonce as soon as a call returns.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Static parameters for every market the exchange lists.
    async fn get_all_market_configs(&self) -> Result<Vec<MarketConfig>, ExchangeError>;

    /// All resting orders owned by `account`, across all markets.
    async fn get_all_user_orders(
        &self,
        account: &AccountId,
    ) -> Result<Vec<RestingOrder>, ExchangeError>;

    /// Balance of `token` the exchange owes `account`, in the token's
    /// native scale.
    async fn get_claimable(
        &self,
        token: &TokenId,
        account: &AccountId,
    ) -> Result<u128, ExchangeError>;

    /// Withdraw a claimable balance. Nonce management for claims is
    /// internal to the client.
    async fn claim(&self, token: &TokenId, amount: u128) -> Result<TxId, ExchangeError>;

    /// Cancel a resting order.
    async fn cancel_order(
        &self,
        order_id: &OrderId,
        fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError>;

    /// Approve `spender` to move `amount` of `token`.
    async fn approve(
        &self,
        spender: &AccountId,
        token: &TokenId,
        amount: u128,
        fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError>;

    /// Submit a new limit order selling `token`.
    #[allow(clippy::too_many_arguments)]
    async fn submit_order(
        &self,
        market_id: MarketId,
        token: &TokenId,
        price: u128,
        amount: u128,
        side: Side,
        nonce: u64,
        fee_ceiling: u128,
    ) -> Result<TxId, ExchangeError>;

    /// Next unused transaction nonce for `account`.
    async fn get_nonce(&self, account: &AccountId) -> Result<u64, ExchangeError>;
}

/// Builds (and rebuilds) exchange sessions. Recovery calls `connect`
/// again whenever a fault requires a fresh session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ExchangeClient>, ExchangeError>;

    /// Account whose orders and balances this session manages.
    fn account(&self) -> &AccountId;
}

/// Trading environment for factory/registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradingEnv {
    Live,
    Paper,
}

impl std::fmt::Display for TradingEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingEnv::Live => write!(f, "live"),
            TradingEnv::Paper => write!(f, "paper"),
        }
    }
}

impl std::str::FromStr for TradingEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(TradingEnv::Live),
            "paper" => Ok(TradingEnv::Paper),
            _ => Err(format!("Unknown environment: {}. Valid options: live, paper", s)),
        }
    }
}

/// Factory function to create a connector for the selected environment.
pub fn create_connector(
    env: TradingEnv,
    session: SessionConfig,
) -> Result<Arc<dyn Connector>, ExchangeError> {
    match env {
        TradingEnv::Live => {
            let connector = GatewayConnector::new(session)?;
            Ok(Arc::new(connector))
        }
        TradingEnv::Paper => Ok(Arc::new(PaperConnector::new(session))),
    }
}
