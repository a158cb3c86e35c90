//! Market-making engine.
//!
//! Owns the cycle loop: fetch the fair price, reconcile the resting book
//! against policy, sequence the resulting operations, and submit them in
//! nonce order. Exchange faults hand control to the recovery controller;
//! input faults (oracle outages, degenerate parameters) skip the market
//! for one tick and are retried on the next.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AppConfig, ConfigError, Policy};
use crate::engine;
use crate::exchange::{Connector, ExchangeClient, ExchangeError};
use crate::logging::MarketThrottles;
use crate::oracle::PriceOracle;
use crate::recovery::RecoveryController;
use crate::sequencer::{self, ChainOp, NonceCounter, OperationBatch, SequenceError};
use crate::types::{AccountId, MarketConfig};

/// Oracle outages repeat every tick; one warning per market per minute.
const ORACLE_WARN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum TradingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// One market the engine quotes: chain parameters joined with its policy.
#[derive(Debug, Clone)]
struct QuotedMarket {
    market: MarketConfig,
    policy: Policy,
}

/// Quote loop over every configured market.
///
/// The engine:
/// 1. Connects and joins configured policies with on-chain market parameters
/// 2. Each tick, reconciles the resting book of every market against the
///    fair price and submits the resulting cancels, approvals, and orders
/// 3. Hands any exchange fault to the recovery controller, then resumes
pub struct MarketMaker {
    config: AppConfig,
    exchange_address: AccountId,
    connector: Arc<dyn Connector>,
    oracle: Arc<dyn PriceOracle>,
    session: Arc<dyn ExchangeClient>,
    books: Vec<QuotedMarket>,
    recovery: RecoveryController,
    oracle_throttles: MarketThrottles,
}

impl std::fmt::Debug for MarketMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketMaker")
            .field("config", &self.config)
            .field("exchange_address", &self.exchange_address)
            .field("books", &self.books)
            .field("oracle_throttles", &self.oracle_throttles)
            .finish_non_exhaustive()
    }
}

impl MarketMaker {
    /// Connect, fetch on-chain market parameters, and join them with the
    /// configured policies.
    ///
    /// # Errors
    /// Fails when the initial session cannot be established or when a
    /// configured market is not listed on the exchange. Both are startup
    /// errors; nothing has been quoted yet.
    pub async fn initialize(
        config: AppConfig,
        exchange_address: AccountId,
        connector: Arc<dyn Connector>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Result<Self, TradingError> {
        let session = connector.connect().await?;
        let listed = session.get_all_market_configs().await?;
        info!(listed = listed.len(), "fetched market parameters from exchange");

        let mut books = Vec::with_capacity(config.markets.len());
        for id in config.market_ids() {
            let market = listed
                .iter()
                .find(|m| m.market_id == id)
                .cloned()
                .ok_or(ConfigError::MarketNotListed(id))?;
            if market.tick_size == 0 || market.lot_size == 0 {
                warn!(
                    market_id = %market.market_id,
                    tick_size = market.tick_size,
                    lot_size = market.lot_size,
                    "market has degenerate parameters and will never quote"
                );
            }
            let entry = config.market_entry(id)?;
            info!(
                market_id = %market.market_id,
                symbol = %entry.oracle_symbol,
                tick_size = market.tick_size,
                lot_size = market.lot_size,
                "quoting market"
            );
            books.push(QuotedMarket {
                market,
                policy: entry.policy.clone(),
            });
        }

        let recovery = RecoveryController::new(
            Arc::clone(&connector),
            books.iter().map(|b| b.market.clone()).collect(),
            config.tokens.clone(),
            Duration::from_secs(config.settle_wait_secs),
            config.recovery_max_fee(),
        );

        Ok(Self {
            config,
            exchange_address,
            connector,
            oracle,
            session,
            books,
            recovery,
            oracle_throttles: MarketThrottles::new(ORACLE_WARN_INTERVAL),
        })
    }

    /// Drive the quote loop forever.
    ///
    /// # Errors
    /// Returns only on nonce-space exhaustion, which no account reaches in
    /// practice. Every other failure is either retried next tick or routed
    /// through recovery.
    pub async fn run(mut self) -> Result<(), TradingError> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        // a recovery pass can outlast several ticks; do not burst afterwards
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            markets = self.books.len(),
            interval_secs = self.config.poll_interval_secs,
            "starting quote loop"
        );

        loop {
            interval.tick().await;
            let books = self.books.clone();
            for book in &books {
                match self.run_market_cycle(book).await {
                    Ok(()) => {}
                    Err(TradingError::Exchange(fault)) => {
                        let (session, _) =
                            self.recovery.recover(Arc::clone(&self.session), &fault).await;
                        self.session = session;
                        // the drain has emptied every book; start the next
                        // tick with a clean reconcile instead of continuing
                        break;
                    }
                    Err(fatal) => {
                        error!(error = %fatal, "unrecoverable error, stopping quote loop");
                        return Err(fatal);
                    }
                }
            }
        }
    }

    /// One reconcile-and-submit pass for a single market.
    ///
    /// Input failures are logged and skipped; exchange errors propagate so
    /// the caller can run recovery.
    #[instrument(skip(self, book), fields(market_id = %book.market.market_id))]
    async fn run_market_cycle(&mut self, book: &QuotedMarket) -> Result<(), TradingError> {
        let market = &book.market;
        let account = self.connector.account();

        let fair = match self.oracle.get_fair_price(market.market_id).await {
            Ok(fair) => fair,
            Err(e) => {
                let throttle = self.oracle_throttles.market(market.market_id.0);
                if throttle.should_log() {
                    let suppressed = throttle.get_and_reset_suppressed_count();
                    warn!(error = %e, suppressed, "no fair price, skipping market this cycle");
                }
                return Ok(());
            }
        };

        let resting: Vec<_> = self
            .session
            .get_all_user_orders(account)
            .await?
            .into_iter()
            .filter(|o| o.market_id == market.market_id)
            .collect();

        let decision = match engine::reconcile(&resting, &fair, &book.policy, market) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "reconciliation rejected inputs, skipping market this cycle");
                return Ok(());
            }
        };
        if decision.is_empty() {
            debug!(fair = %fair.value, resting = resting.len(), "book already in band");
            return Ok(());
        }

        // wallet activity outside this loop (claims during recovery) moves
        // the account nonce, so re-read it before spending any
        let next_unused = self.session.get_nonce(account).await?;
        let mut counter = NonceCounter::new(next_unused);
        let batch = match sequencer::sequence(&decision, market, &mut counter) {
            Ok(batch) => batch,
            Err(e @ SequenceError::NonceExhaustion { .. }) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "could not sequence operations, skipping market this cycle");
                return Ok(());
            }
        };

        info!(
            fair = %fair.value,
            resting = resting.len(),
            ops = batch.len(),
            first_nonce = next_unused,
            "submitting operations"
        );
        self.execute(&batch).await?;
        Ok(())
    }

    /// Submit a sequenced batch in order, waiting for each transaction to
    /// be accepted before sending the next.
    async fn execute(&self, batch: &OperationBatch) -> Result<(), ExchangeError> {
        for op in &batch.ops {
            let tx = match &op.op {
                ChainOp::Cancel { order_id } => {
                    self.session
                        .cancel_order(order_id, self.config.max_fee, op.nonce)
                        .await?
                }
                ChainOp::Approve { token, amount } => {
                    self.session
                        .approve(
                            &self.exchange_address,
                            token,
                            *amount,
                            self.config.max_fee,
                            op.nonce,
                        )
                        .await?
                }
                ChainOp::Submit {
                    market_id,
                    token,
                    price,
                    amount,
                    side,
                } => {
                    self.session
                        .submit_order(
                            *market_id,
                            token,
                            *price,
                            *amount,
                            *side,
                            op.nonce,
                            self.config.max_fee,
                        )
                        .await?
                }
            };
            debug!(nonce = op.nonce, op = op.op.kind(), tx = %tx, "operation accepted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::exchange::paper::{PaperConnector, PaperOp};
    use crate::oracle::OracleError;
    use crate::types::{FairPrice, MarketId, OrderId, RestingOrder, Side, TokenId};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct TestOracle {
        price: std::sync::Mutex<Option<Decimal>>,
    }

    impl TestOracle {
        fn fixed(price: Decimal) -> Arc<Self> {
            Arc::new(Self {
                price: std::sync::Mutex::new(Some(price)),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                price: std::sync::Mutex::new(None),
            })
        }

        fn set(&self, price: Decimal) {
            *self.price.lock().unwrap() = Some(price);
        }
    }

    #[async_trait]
    impl PriceOracle for TestOracle {
        async fn get_fair_price(&self, market_id: MarketId) -> Result<FairPrice, OracleError> {
            match *self.price.lock().unwrap() {
                Some(value) => Ok(FairPrice {
                    market_id,
                    value,
                    timestamp: 0,
                }),
                None => Err(OracleError::NoData {
                    symbol: "TEST".into(),
                }),
            }
        }
    }

    const SCALE: u128 = 1_000_000_000_000_000_000;

    fn exchange_address() -> AccountId {
        AccountId::new("0xpaper-exchange")
    }

    async fn maker(connector: Arc<PaperConnector>, oracle: Arc<TestOracle>) -> MarketMaker {
        MarketMaker::initialize(
            AppConfig::default(),
            exchange_address(),
            connector,
            oracle,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_rejects_market_missing_from_chain() {
        let mut config = AppConfig::default();
        let entry = config.markets.remove(&1).unwrap();
        config.markets.insert(99, entry);

        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let err = MarketMaker::initialize(
            config,
            exchange_address(),
            connector,
            TestOracle::fixed(dec!(2000)),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            TradingError::Config(ConfigError::MarketNotListed(MarketId(99)))
        ));
    }

    #[tokio::test]
    async fn test_empty_book_is_quoted_on_both_sides() {
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        let mut mm = maker(connector.clone(), TestOracle::fixed(dec!(2000))).await;

        let book = mm.books[0].clone();
        mm.run_market_cycle(&book).await.unwrap();

        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, Side::Bid);
        assert_eq!(orders[0].price, 1998 * SCALE);
        assert_eq!(orders[0].amount_remaining, 100_100_000_000_000_000);
        assert_eq!(orders[1].side, Side::Ask);
        assert_eq!(orders[1].price, 2002 * SCALE);
        assert_eq!(orders[1].amount_remaining, 99_900_000_000_000_000);

        // two approvals and two submissions
        assert_eq!(exchange.current_nonce().await, 4);
        assert_eq!(
            exchange.allowance(&TokenId::new("0xquote")).await,
            Some(199_999_800_000_000_000_000)
        );
        assert_eq!(
            exchange.allowance(&TokenId::new("0xbase")).await,
            Some(99_900_000_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_book_already_in_band_is_left_alone() {
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange
            .seed_order(RestingOrder {
                id: OrderId::new("ask-1"),
                market_id: MarketId(1),
                side: Side::Ask,
                price: 2002 * SCALE,
                amount_remaining: 99_900_000_000_000_000,
            })
            .await;
        exchange
            .seed_order(RestingOrder {
                id: OrderId::new("bid-1"),
                market_id: MarketId(1),
                side: Side::Bid,
                price: 1998 * SCALE,
                amount_remaining: 100_100_000_000_000_000,
            })
            .await;

        let mut mm = maker(connector.clone(), TestOracle::fixed(dec!(2000))).await;
        let book = mm.books[0].clone();
        mm.run_market_cycle(&book).await.unwrap();

        assert_eq!(exchange.orders().await.len(), 2);
        assert_eq!(exchange.current_nonce().await, 0);
    }

    #[tokio::test]
    async fn test_oracle_outage_skips_the_cycle() {
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        let mut mm = maker(connector.clone(), TestOracle::down()).await;

        let book = mm.books[0].clone();
        mm.run_market_cycle(&book).await.unwrap();

        assert!(exchange.orders().await.is_empty());
        assert_eq!(exchange.current_nonce().await, 0);
    }

    #[tokio::test]
    async fn test_exchange_fault_propagates_for_recovery() {
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange
            .inject_fault(PaperOp::Orders, ExchangeError::Network("rpc down".into()))
            .await;
        let mut mm = maker(connector.clone(), TestOracle::fixed(dec!(2000))).await;

        let book = mm.books[0].clone();
        let err = mm.run_market_cycle(&book).await.unwrap_err();
        assert!(matches!(err, TradingError::Exchange(_)));
    }

    #[tokio::test]
    async fn test_nonce_is_reread_after_external_wallet_activity() {
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        let oracle = TestOracle::fixed(dec!(2000));
        let mut mm = maker(connector.clone(), oracle.clone()).await;

        let book = mm.books[0].clone();
        mm.run_market_cycle(&book).await.unwrap();
        assert_eq!(exchange.current_nonce().await, 4);

        // a claim consumes a nonce outside the quote path
        exchange.set_claimable(TokenId::new("0xquote"), 50).await;
        exchange.claim(&TokenId::new("0xquote"), 50).await.unwrap();
        assert_eq!(exchange.current_nonce().await, 5);

        // move the fair price so both quotes are re-created
        oracle.set(dec!(2100));
        mm.run_market_cycle(&book).await.unwrap();

        // old quotes stay (neither too close nor undersized), new pair added
        assert_eq!(exchange.orders().await.len(), 4);
        assert_eq!(exchange.current_nonce().await, 9);
    }
}
