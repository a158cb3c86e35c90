//! Paper Exchange Client
//!
//! In-memory order book state for dry runs and tests. Behaves like the
//! chain boundary: nonces are checked and consumed per transaction, state
//! survives session re-establishment, and every operation can be scripted
//! to fail via the fault plan.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::exchange::{Connector, ExchangeClient, ExchangeError, TxId};
use crate::types::{AccountId, MarketConfig, MarketId, OrderId, RestingOrder, Side, TokenId};

/// Operations a fault can be planted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    Connect,
    Markets,
    Orders,
    Claimable,
    Claim,
    Cancel,
    Approve,
    Submit,
    Nonce,
}

#[derive(Debug, Default)]
struct PaperBook {
    markets: Vec<MarketConfig>,
    orders: Vec<RestingOrder>,
    claimable: HashMap<TokenId, u128>,
    allowances: HashMap<TokenId, u128>,
    nonce: u64,
    next_order_seq: u64,
    next_tx_seq: u64,
}

impl PaperBook {
    fn take_nonce(&mut self, nonce: u64) -> Result<(), ExchangeError> {
        if nonce != self.nonce {
            return Err(ExchangeError::rejected(format!(
                "invalid transaction nonce: expected {}, got {}",
                self.nonce, nonce
            )));
        }
        self.nonce += 1;
        Ok(())
    }

    fn next_tx(&mut self) -> TxId {
        self.next_tx_seq += 1;
        TxId(format!("paper-tx-{}", self.next_tx_seq))
    }
}

/// In-memory exchange. Shared behind `Arc`; reconnecting yields the same
/// book, mirroring how chain state survives a new RPC session.
pub struct PaperExchange {
    book: RwLock<PaperBook>,
    faults: Mutex<HashMap<PaperOp, VecDeque<ExchangeError>>>,
}

impl PaperExchange {
    pub fn new(markets: Vec<MarketConfig>, starting_nonce: u64) -> Self {
        Self {
            book: RwLock::new(PaperBook {
                markets,
                nonce: starting_nonce,
                ..PaperBook::default()
            }),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Single ETH/USDC-style market: id 1, 18 decimals, tick 1e15, lot 1e12.
    pub fn with_default_market() -> Self {
        Self::new(
            vec![MarketConfig {
                market_id: MarketId(1),
                base_token: TokenId::new("0xbase"),
                quote_token: TokenId::new("0xquote"),
                tick_size: 1_000_000_000_000_000,
                lot_size: 1_000_000_000_000,
                base_decimals: 18,
            }],
            0,
        )
    }

    /// Plant an error to be returned by the next call of `op`.
    /// Multiple faults on the same operation queue up in order.
    pub async fn inject_fault(&self, op: PaperOp, error: ExchangeError) {
        let mut faults = self.faults.lock().await;
        faults.entry(op).or_default().push_back(error);
    }

    async fn take_fault(&self, op: PaperOp) -> Option<ExchangeError> {
        let mut faults = self.faults.lock().await;
        faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Seed a resting order, as if submitted by an earlier session.
    pub async fn seed_order(&self, order: RestingOrder) {
        self.book.write().await.orders.push(order);
    }

    /// Seed a claimable balance.
    pub async fn set_claimable(&self, token: TokenId, amount: u128) {
        self.book.write().await.claimable.insert(token, amount);
    }

    /// Current resting orders, in submission order.
    pub async fn orders(&self) -> Vec<RestingOrder> {
        self.book.read().await.orders.clone()
    }

    /// Last approved allowance for a token.
    pub async fn allowance(&self, token: &TokenId) -> Option<u128> {
        self.book.read().await.allowances.get(token).copied()
    }

    /// Next unused nonce, without consuming it.
    pub async fn current_nonce(&self) -> u64 {
        self.book.read().await.nonce
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_all_market_configs(&self) -> Result<Vec<MarketConfig>, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Markets).await {
            return Err(fault);
        }
        Ok(self.book.read().await.markets.clone())
    }

    async fn get_all_user_orders(
        &self,
        _account: &AccountId,
    ) -> Result<Vec<RestingOrder>, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Orders).await {
            return Err(fault);
        }
        Ok(self.book.read().await.orders.clone())
    }

    async fn get_claimable(
        &self,
        token: &TokenId,
        _account: &AccountId,
    ) -> Result<u128, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Claimable).await {
            return Err(fault);
        }
        Ok(self
            .book
            .read()
            .await
            .claimable
            .get(token)
            .copied()
            .unwrap_or(0))
    }

    async fn claim(&self, token: &TokenId, amount: u128) -> Result<TxId, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Claim).await {
            return Err(fault);
        }
        let mut book = self.book.write().await;
        let available = book.claimable.get(token).copied().unwrap_or(0);
        if amount > available {
            return Err(ExchangeError::rejected(format!(
                "claim of {} exceeds claimable {}",
                amount, available
            )));
        }
        book.claimable.insert(token.clone(), available - amount);
        // claims manage their own nonce, like a wallet invoke
        book.nonce += 1;
        let tx = book.next_tx();
        info!(token = %token, amount, tx = %tx, "paper claim accepted");
        Ok(tx)
    }

    async fn cancel_order(
        &self,
        order_id: &OrderId,
        _fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Cancel).await {
            return Err(fault);
        }
        let mut book = self.book.write().await;
        book.take_nonce(nonce)?;
        let before = book.orders.len();
        book.orders.retain(|o| &o.id != order_id);
        if book.orders.len() == before {
            return Err(ExchangeError::rejected(format!(
                "unknown order {}",
                order_id
            )));
        }
        let tx = book.next_tx();
        debug!(order_id = %order_id, nonce, tx = %tx, "paper cancel accepted");
        Ok(tx)
    }

    async fn approve(
        &self,
        _spender: &AccountId,
        token: &TokenId,
        amount: u128,
        _fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Approve).await {
            return Err(fault);
        }
        let mut book = self.book.write().await;
        book.take_nonce(nonce)?;
        book.allowances.insert(token.clone(), amount);
        let tx = book.next_tx();
        debug!(token = %token, amount, nonce, tx = %tx, "paper approve accepted");
        Ok(tx)
    }

    async fn submit_order(
        &self,
        market_id: MarketId,
        token: &TokenId,
        price: u128,
        amount: u128,
        side: Side,
        nonce: u64,
        _fee_ceiling: u128,
    ) -> Result<TxId, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Submit).await {
            return Err(fault);
        }
        let mut book = self.book.write().await;
        book.take_nonce(nonce)?;

        let market = book
            .markets
            .iter()
            .find(|m| m.market_id == market_id)
            .ok_or_else(|| ExchangeError::rejected(format!("unknown market {}", market_id)))?;
        let expected_token = match side {
            Side::Ask => &market.base_token,
            Side::Bid => &market.quote_token,
        };
        if token != expected_token {
            return Err(ExchangeError::rejected(format!(
                "token {} does not match {} side of market {}",
                token, side, market_id
            )));
        }

        book.next_order_seq += 1;
        let id = OrderId::new(format!("paper-{}", book.next_order_seq));
        book.orders.push(RestingOrder {
            id: id.clone(),
            market_id,
            side,
            price,
            amount_remaining: amount,
        });
        let tx = book.next_tx();
        info!(market_id = %market_id, side = %side, price, amount, nonce, order_id = %id, "paper order submitted");
        Ok(tx)
    }

    async fn get_nonce(&self, _account: &AccountId) -> Result<u64, ExchangeError> {
        if let Some(fault) = self.take_fault(PaperOp::Nonce).await {
            return Err(fault);
        }
        Ok(self.book.read().await.nonce)
    }
}

/// Connector over a shared paper book. Reconnecting returns the same
/// book so state behaves like the chain across session drops.
pub struct PaperConnector {
    session: SessionConfig,
    exchange: Arc<PaperExchange>,
    connects: AtomicUsize,
}

impl PaperConnector {
    pub fn new(session: SessionConfig) -> Self {
        Self::with_exchange(session, Arc::new(PaperExchange::with_default_market()))
    }

    pub fn with_exchange(session: SessionConfig, exchange: Arc<PaperExchange>) -> Self {
        Self {
            session,
            exchange,
            connects: AtomicUsize::new(0),
        }
    }

    /// How many sessions have been established, including re-establishment
    /// during recovery.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The shared book, for seeding and assertions.
    pub fn exchange(&self) -> Arc<PaperExchange> {
        Arc::clone(&self.exchange)
    }
}

#[async_trait]
impl Connector for PaperConnector {
    async fn connect(&self) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
        if let Some(fault) = self.exchange.take_fault(PaperOp::Connect).await {
            return Err(fault);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!(account = %self.session.account, "paper session established");
        Ok(self.exchange.clone())
    }

    fn account(&self) -> &AccountId {
        &self.session.account
    }
}
