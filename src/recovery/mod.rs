//! Recovery Controller
//!
//! Explicit state machine driven after any exchange fault during a cycle:
//! `Faulted` (optionally rebuild the session) → `Draining` (cancel every
//! resting order across all configured markets at a reduced fee, wait for
//! settlement, log what still rests) → `Recovered` (claim claimable
//! balances per market) → back to `Running`. Nothing in here terminates
//! the process; every internal failure is logged and the pass continues
//! best-effort.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenInfo;
use crate::exchange::{Connector, ExchangeClient, ExchangeError};
use crate::sequencer::NonceCounter;
use crate::types::{scaled_to_decimal, MarketConfig, TokenId};

/// Recovery phases. `Running` means control is back with the cycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Running,
    Faulted,
    Draining,
    Recovered,
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Draining => write!(f, "Draining"),
            Self::Recovered => write!(f, "Recovered"),
        }
    }
}

/// What one recovery pass did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Whether the session was rebuilt before draining.
    pub reestablished: bool,
    pub cancels_accepted: usize,
    pub cancels_failed: usize,
    /// Orders still resting after the settle wait; logged, not retried.
    pub leftover_orders: usize,
    pub claims_accepted: usize,
    pub claims_failed: usize,
}

/// Drives the fault → drain → reclaim → resume procedure.
pub struct RecoveryController {
    connector: Arc<dyn Connector>,
    markets: Vec<MarketConfig>,
    tokens: Vec<TokenInfo>,
    settle_wait: Duration,
    drain_fee_ceiling: u128,
}

impl RecoveryController {
    pub fn new(
        connector: Arc<dyn Connector>,
        markets: Vec<MarketConfig>,
        tokens: Vec<TokenInfo>,
        settle_wait: Duration,
        drain_fee_ceiling: u128,
    ) -> Self {
        Self {
            connector,
            markets,
            tokens,
            settle_wait,
            drain_fee_ceiling,
        }
    }

    /// Run one full recovery pass. Always returns a usable session;
    /// re-establishment retries until the connector succeeds.
    #[instrument(skip(self, session, fault), fields(fault = %fault))]
    pub async fn recover(
        &self,
        session: Arc<dyn ExchangeClient>,
        fault: &ExchangeError,
    ) -> (Arc<dyn ExchangeClient>, RecoverySummary) {
        let mut summary = RecoverySummary::default();
        let mut session = session;
        let mut state = RecoveryState::Faulted;
        warn!(
            requires_new_session = fault.requires_new_session(),
            "exchange fault, entering recovery"
        );

        loop {
            state = match state {
                RecoveryState::Faulted => {
                    if fault.requires_new_session() {
                        session = self.reestablish().await;
                        summary.reestablished = true;
                    }
                    RecoveryState::Draining
                }
                RecoveryState::Draining => {
                    self.drain(&session, &mut summary).await;
                    self.claim_all(&session, &mut summary).await;
                    RecoveryState::Recovered
                }
                RecoveryState::Recovered => {
                    info!(
                        cancels = summary.cancels_accepted,
                        leftover = summary.leftover_orders,
                        claims = summary.claims_accepted,
                        "recovery complete, resuming cycle loop"
                    );
                    RecoveryState::Running
                }
                RecoveryState::Running => break,
            };
            debug!(state = %state, "recovery state transition");
        }

        (session, summary)
    }

    /// Rebuild the session, retrying forever with capped backoff. The
    /// loop is infinite by design: without a session nothing else can
    /// proceed, and availability beats giving up.
    async fn reestablish(&self) -> Arc<dyn ExchangeClient> {
        let mut backoff = Duration::from_secs(2);
        let mut attempt: u32 = 1;
        loop {
            match self.connector.connect().await {
                Ok(session) => {
                    info!(attempt, "session re-established");
                    return session;
                }
                Err(e) => {
                    error!(
                        attempt,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "failed to re-establish session"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(60));
                    attempt += 1;
                }
            }
        }
    }

    /// Cancel every resting order at the reduced fee ceiling, wait for
    /// settlement, then log whatever still rests. Failed cancels are not
    /// retried here; the next recovery pass will see them again.
    async fn drain(&self, session: &Arc<dyn ExchangeClient>, summary: &mut RecoverySummary) {
        let account = self.connector.account();

        let orders = match session.get_all_user_orders(account).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "failed to fetch resting orders for drain");
                return;
            }
        };
        if orders.is_empty() {
            debug!("no resting orders to drain");
            return;
        }

        let next_unused = match session.get_nonce(account).await {
            Ok(nonce) => nonce,
            Err(e) => {
                error!(error = %e, "failed to fetch nonce for drain");
                return;
            }
        };
        let mut counter = NonceCounter::new(next_unused);

        info!(
            orders = orders.len(),
            fee_ceiling = self.drain_fee_ceiling,
            "draining resting orders"
        );
        for order in &orders {
            let nonce = match counter.allocate() {
                Ok(nonce) => nonce,
                Err(e) => {
                    error!(error = %e, "nonce sequence exhausted during drain");
                    break;
                }
            };
            match session
                .cancel_order(&order.id, self.drain_fee_ceiling, nonce)
                .await
            {
                Ok(tx) => {
                    summary.cancels_accepted += 1;
                    debug!(
                        order_id = %order.id,
                        market_id = %order.market_id,
                        nonce,
                        tx = %tx,
                        "drain cancel accepted"
                    );
                }
                Err(e) => {
                    summary.cancels_failed += 1;
                    warn!(
                        order_id = %order.id,
                        market_id = %order.market_id,
                        nonce,
                        error = %e,
                        "drain cancel failed"
                    );
                }
            }
        }

        debug!(secs = self.settle_wait.as_secs(), "waiting for drain to settle");
        tokio::time::sleep(self.settle_wait).await;

        match session.get_all_user_orders(account).await {
            Ok(leftover) => {
                summary.leftover_orders = leftover.len();
                if leftover.is_empty() {
                    info!("drain complete, book is clear");
                } else {
                    for order in &leftover {
                        warn!(
                            order_id = %order.id,
                            market_id = %order.market_id,
                            side = %order.side,
                            "order still resting after drain"
                        );
                    }
                }
            }
            Err(e) => error!(error = %e, "failed to re-query orders after drain"),
        }
    }

    /// Claim claimable balances of each market's base and quote token.
    /// Individual failures are logged and do not abort the pass.
    async fn claim_all(&self, session: &Arc<dyn ExchangeClient>, summary: &mut RecoverySummary) {
        let account = self.connector.account();
        for market in &self.markets {
            for token in [&market.base_token, &market.quote_token] {
                let claimable = match session.get_claimable(token, account).await {
                    Ok(amount) => amount,
                    Err(e) => {
                        summary.claims_failed += 1;
                        warn!(
                            market_id = %market.market_id,
                            token = %token,
                            error = %e,
                            "failed to query claimable balance"
                        );
                        continue;
                    }
                };
                if claimable == 0 {
                    continue;
                }
                match session.claim(token, claimable).await {
                    Ok(tx) => {
                        summary.claims_accepted += 1;
                        info!(
                            market_id = %market.market_id,
                            token = %token,
                            amount = %self.format_amount(token, claimable),
                            tx = %tx,
                            "claimed balance"
                        );
                    }
                    Err(e) => {
                        summary.claims_failed += 1;
                        warn!(
                            market_id = %market.market_id,
                            token = %token,
                            error = %e,
                            "claim failed"
                        );
                    }
                }
            }
        }
    }

    /// Render a raw token amount in human units when the token is known.
    fn format_amount(&self, token: &TokenId, raw: u128) -> String {
        match self.tokens.iter().find(|t| &t.address == token) {
            Some(info) => match scaled_to_decimal(raw, info.decimals) {
                Some(value) => format!("{} {}", value, info.symbol),
                None => raw.to_string(),
            },
            None => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::exchange::paper::{PaperConnector, PaperOp};
    use crate::types::{MarketId, OrderId, RestingOrder, Side};

    fn markets() -> Vec<MarketConfig> {
        vec![MarketConfig {
            market_id: MarketId(1),
            base_token: TokenId::new("0xbase"),
            quote_token: TokenId::new("0xquote"),
            tick_size: 1_000_000_000_000_000,
            lot_size: 1_000_000_000_000,
            base_decimals: 18,
        }]
    }

    fn resting(id: &str) -> RestingOrder {
        RestingOrder {
            id: OrderId::new(id),
            market_id: MarketId(1),
            side: Side::Ask,
            price: 2_002_000_000_000_000_000_000,
            amount_remaining: 1_000_000_000_000_000_000,
        }
    }

    fn controller(connector: Arc<PaperConnector>) -> RecoveryController {
        RecoveryController::new(
            connector,
            markets(),
            vec![],
            Duration::from_secs(10),
            100,
        )
    }

    #[tokio::test]
    async fn test_transient_fault_keeps_session_and_drains() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange.seed_order(resting("o1")).await;
        exchange.seed_order(resting("o2")).await;
        let session = connector.connect().await.unwrap();

        let ctl = controller(connector.clone());
        let fault = ExchangeError::Throttled("429".into());
        let (_, summary) = ctl.recover(session, &fault).await;

        assert!(!summary.reestablished);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(summary.cancels_accepted, 2);
        assert_eq!(summary.leftover_orders, 0);
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_fault_rebuilds_session_before_draining() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange.seed_order(resting("o1")).await;
        let session = connector.connect().await.unwrap();

        let ctl = controller(connector.clone());
        let fault = ExchangeError::Network("rpc down".into());
        let (_, summary) = ctl.recover(session, &fault).await;

        assert!(summary.reestablished);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(summary.cancels_accepted, 1);
    }

    #[tokio::test]
    async fn test_reestablish_retries_until_connector_succeeds() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        let session = connector.connect().await.unwrap();
        exchange
            .inject_fault(PaperOp::Connect, ExchangeError::Network("still down".into()))
            .await;
        exchange
            .inject_fault(PaperOp::Connect, ExchangeError::Network("still down".into()))
            .await;

        let ctl = controller(connector.clone());
        let fault = ExchangeError::rejected("stale nonce");
        let (_, summary) = ctl.recover(session, &fault).await;

        assert!(summary.reestablished);
        // first connect in the test, two scripted failures, then success
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_cancel_leaves_leftovers_for_the_next_pass() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange.seed_order(resting("o1")).await;
        exchange.seed_order(resting("o2")).await;
        exchange
            .inject_fault(PaperOp::Cancel, ExchangeError::rejected("fee too low"))
            .await;
        let session = connector.connect().await.unwrap();

        let ctl = controller(connector.clone());
        let (session, summary) = ctl
            .recover(session, &ExchangeError::Throttled("busy".into()))
            .await;

        // the dropped cancel desyncs every later nonce in the batch
        assert_eq!(summary.cancels_accepted, 0);
        assert_eq!(summary.cancels_failed, 2);
        assert_eq!(summary.leftover_orders, 2);

        // a later pass re-reads the nonce and clears the book
        let (_, summary) = ctl
            .recover(session, &ExchangeError::Throttled("busy".into()))
            .await;
        assert_eq!(summary.cancels_accepted, 2);
        assert_eq!(summary.leftover_orders, 0);
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_failure_does_not_abort_the_pass() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let exchange = connector.exchange();
        exchange.set_claimable(TokenId::new("0xbase"), 7).await;
        exchange.set_claimable(TokenId::new("0xquote"), 11).await;
        exchange
            .inject_fault(PaperOp::Claim, ExchangeError::rejected("claim reverted"))
            .await;
        let session = connector.connect().await.unwrap();

        let ctl = controller(connector.clone());
        let (_, summary) = ctl
            .recover(session, &ExchangeError::Throttled("busy".into()))
            .await;

        // base claim fails, quote claim still goes through
        assert_eq!(summary.claims_failed, 1);
        assert_eq!(summary.claims_accepted, 1);
        assert_eq!(
            exchange
                .get_claimable(&TokenId::new("0xquote"), connector.account())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_zero_claimable_balances_are_not_claimed() {
        tokio::time::pause();
        let connector = Arc::new(PaperConnector::new(SessionConfig::paper()));
        let session = connector.connect().await.unwrap();

        let ctl = controller(connector.clone());
        let (_, summary) = ctl
            .recover(session, &ExchangeError::Throttled("busy".into()))
            .await;

        assert_eq!(summary.claims_accepted, 0);
        assert_eq!(summary.claims_failed, 0);
    }
}
