//! Chain Gateway Exchange Client
//!
//! Talks to an order-book gateway over HTTPS. The gateway fronts the chain:
//! transaction endpoints block until the transaction reaches a terminal
//! status, so a returned `TxId` means accepted on chain and the next nonce
//! may be spent immediately.
//!
//! Large fixed-point integers (prices, amounts, claimables) travel as
//! decimal strings because JSON numbers cannot carry them exactly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::exchange::{Connector, ExchangeClient, ExchangeError, TxId};
use crate::types::{AccountId, MarketConfig, MarketId, OrderId, RestingOrder, Side, TokenId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Transaction endpoints block until chain acceptance, which can outlive
/// an ordinary request timeout.
const TX_TIMEOUT: Duration = Duration::from_secs(180);

/// Exchange client backed by the HTTP gateway.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(gateway_url: &str) -> Result<Self, ExchangeError> {
        if gateway_url.is_empty() {
            return Err(ExchangeError::Configuration(
                "gateway URL is empty; set QK_GATEWAY_URL".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(TX_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ExchangeError> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(map_transport)?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ExchangeError::Other(format!("invalid gateway response: {}", e)))
    }

    async fn post_tx<B: Serialize>(&self, path: &str, body: &B) -> Result<TxId, ExchangeError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;
        let resp = check_status(resp).await?;
        let tx: TxWire = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Other(format!("invalid gateway response: {}", e)))?;
        tx.into_result()
    }
}

#[async_trait]
impl ExchangeClient for GatewayClient {
    async fn get_all_market_configs(&self) -> Result<Vec<MarketConfig>, ExchangeError> {
        let wire: MarketsWire = self.get_json("markets", &[]).await?;
        wire.markets
            .into_iter()
            .map(MarketConfigWire::into_config)
            .collect()
    }

    async fn get_all_user_orders(
        &self,
        account: &AccountId,
    ) -> Result<Vec<RestingOrder>, ExchangeError> {
        let path = format!("accounts/{}/orders", account);
        let wire: OrdersWire = self.get_json(&path, &[]).await?;
        wire.orders
            .into_iter()
            .map(OrderWire::into_order)
            .collect()
    }

    async fn get_claimable(
        &self,
        token: &TokenId,
        account: &AccountId,
    ) -> Result<u128, ExchangeError> {
        let wire: ClaimableWire = self
            .get_json(
                "claimable",
                &[("token", token.as_str()), ("account", account.as_str())],
            )
            .await?;
        parse_u128("claimable amount", &wire.amount)
    }

    async fn claim(&self, token: &TokenId, amount: u128) -> Result<TxId, ExchangeError> {
        debug!(token = %token, amount, "claiming balance");
        self.post_tx(
            "claim",
            &ClaimRequest {
                token: token.as_str(),
                amount: amount.to_string(),
            },
        )
        .await
    }

    async fn cancel_order(
        &self,
        order_id: &OrderId,
        fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError> {
        debug!(order_id = %order_id, nonce, "cancelling order");
        self.post_tx(
            "cancel",
            &CancelRequest {
                order_id: order_id.as_str(),
                max_fee: fee_ceiling.to_string(),
                nonce,
            },
        )
        .await
    }

    async fn approve(
        &self,
        spender: &AccountId,
        token: &TokenId,
        amount: u128,
        fee_ceiling: u128,
        nonce: u64,
    ) -> Result<TxId, ExchangeError> {
        debug!(token = %token, amount, nonce, "approving spend");
        self.post_tx(
            "approve",
            &ApproveRequest {
                spender: spender.as_str(),
                token: token.as_str(),
                amount: amount.to_string(),
                max_fee: fee_ceiling.to_string(),
                nonce,
            },
        )
        .await
    }

    async fn submit_order(
        &self,
        market_id: MarketId,
        token: &TokenId,
        price: u128,
        amount: u128,
        side: Side,
        nonce: u64,
        fee_ceiling: u128,
    ) -> Result<TxId, ExchangeError> {
        debug!(market_id = %market_id, side = %side, price, amount, nonce, "submitting order");
        self.post_tx(
            "submit",
            &SubmitRequest {
                market_id: market_id.0,
                token: token.as_str(),
                price: price.to_string(),
                amount: amount.to_string(),
                side: side.to_string(),
                nonce,
                max_fee: fee_ceiling.to_string(),
            },
        )
        .await
    }

    async fn get_nonce(&self, account: &AccountId) -> Result<u64, ExchangeError> {
        let path = format!("accounts/{}/nonce", account);
        let wire: NonceWire = self.get_json(&path, &[]).await?;
        Ok(wire.nonce)
    }
}

/// Connector that builds gateway sessions. Each `connect` constructs a
/// fresh HTTP client and verifies it by fetching the account nonce, so a
/// successful return means the session is usable.
pub struct GatewayConnector {
    session: SessionConfig,
}

impl GatewayConnector {
    pub fn new(session: SessionConfig) -> Result<Self, ExchangeError> {
        if session.gateway_url.is_empty() {
            return Err(ExchangeError::Configuration(
                "gateway URL is empty; set QK_GATEWAY_URL".to_string(),
            ));
        }
        if session.account.as_str().is_empty() {
            return Err(ExchangeError::Configuration(
                "account address is empty; set QK_ACCOUNT_ADDRESS".to_string(),
            ));
        }
        Ok(Self { session })
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
        let client = GatewayClient::new(&self.session.gateway_url)?;
        let nonce = client.get_nonce(&self.session.account).await?;
        info!(account = %self.session.account, nonce, "gateway session established");
        Ok(Arc::new(client))
    }

    fn account(&self) -> &AccountId {
        &self.session.account
    }
}

fn map_transport(e: reqwest::Error) -> ExchangeError {
    ExchangeError::Network(e.to_string())
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ExchangeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        return Err(ExchangeError::Throttled(body));
    }
    if status.is_server_error() {
        return Err(ExchangeError::Network(format!("gateway {}: {}", status, body)));
    }
    // 4xx: the gateway relayed a chain-side refusal
    let reason = serde_json::from_str::<ErrorWire>(&body)
        .map(|e| e.reason)
        .unwrap_or(body);
    Err(ExchangeError::Rejected { reason })
}

fn parse_u128(what: &str, raw: &str) -> Result<u128, ExchangeError> {
    raw.parse::<u128>()
        .map_err(|_| ExchangeError::Other(format!("invalid {} in gateway response: '{}'", what, raw)))
}

fn parse_side(raw: &str) -> Result<Side, ExchangeError> {
    match raw {
        "bid" => Ok(Side::Bid),
        "ask" => Ok(Side::Ask),
        other => Err(ExchangeError::Other(format!(
            "invalid side in gateway response: '{}'",
            other
        ))),
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct MarketsWire {
    markets: Vec<MarketConfigWire>,
}

#[derive(Debug, Deserialize)]
struct MarketConfigWire {
    market_id: u64,
    base_token: String,
    quote_token: String,
    tick_size: String,
    lot_size: String,
    base_decimals: u32,
}

impl MarketConfigWire {
    fn into_config(self) -> Result<MarketConfig, ExchangeError> {
        Ok(MarketConfig {
            market_id: MarketId(self.market_id),
            base_token: TokenId::new(self.base_token),
            quote_token: TokenId::new(self.quote_token),
            tick_size: parse_u128("tick size", &self.tick_size)?,
            lot_size: parse_u128("lot size", &self.lot_size)?,
            base_decimals: self.base_decimals,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrdersWire {
    orders: Vec<OrderWire>,
}

#[derive(Debug, Deserialize)]
struct OrderWire {
    order_id: String,
    market_id: u64,
    side: String,
    price: String,
    amount_remaining: String,
}

impl OrderWire {
    fn into_order(self) -> Result<RestingOrder, ExchangeError> {
        Ok(RestingOrder {
            id: OrderId::new(self.order_id),
            market_id: MarketId(self.market_id),
            side: parse_side(&self.side)?,
            price: parse_u128("order price", &self.price)?,
            amount_remaining: parse_u128("order amount", &self.amount_remaining)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ClaimableWire {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct NonceWire {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct TxWire {
    tx_hash: String,
    status: String,
    reason: Option<String>,
}

impl TxWire {
    fn into_result(self) -> Result<TxId, ExchangeError> {
        match self.status.as_str() {
            "ACCEPTED" => Ok(TxId(self.tx_hash)),
            _ => Err(ExchangeError::Rejected {
                reason: self
                    .reason
                    .unwrap_or_else(|| format!("gateway status {}", self.status)),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClaimRequest<'a> {
    token: &'a str,
    amount: String,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    order_id: &'a str,
    max_fee: String,
    nonce: u64,
}

#[derive(Debug, Serialize)]
struct ApproveRequest<'a> {
    spender: &'a str,
    token: &'a str,
    amount: String,
    max_fee: String,
    nonce: u64,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    market_id: u64,
    token: &'a str,
    price: String,
    amount: String,
    side: String,
    nonce: u64,
    max_fee: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_wire_parses_big_integers() {
        let raw = r#"{
            "markets": [{
                "market_id": 1,
                "base_token": "0xabc",
                "quote_token": "0xdef",
                "tick_size": "1000000000000000",
                "lot_size": "1000000000000",
                "base_decimals": 18
            }]
        }"#;
        let wire: MarketsWire = serde_json::from_str(raw).unwrap();
        let cfg = wire.markets.into_iter().next().unwrap().into_config().unwrap();
        assert_eq!(cfg.market_id, MarketId(1));
        assert_eq!(cfg.tick_size, 1_000_000_000_000_000);
        assert_eq!(cfg.lot_size, 1_000_000_000_000);
    }

    #[test]
    fn test_order_wire_parses_values_beyond_u64() {
        let raw = r#"{
            "order_id": "0x77",
            "market_id": 1,
            "side": "ask",
            "price": "2002000000000000000000",
            "amount_remaining": "99900000000000000"
        }"#;
        let order: RestingOrder = serde_json::from_str::<OrderWire>(raw)
            .unwrap()
            .into_order()
            .unwrap();
        assert_eq!(order.side, Side::Ask);
        assert_eq!(order.price, 2_002_000_000_000_000_000_000);
    }

    #[test]
    fn test_order_wire_rejects_bad_side() {
        let raw = r#"{
            "order_id": "0x77",
            "market_id": 1,
            "side": "long",
            "price": "1",
            "amount_remaining": "1"
        }"#;
        let res = serde_json::from_str::<OrderWire>(raw).unwrap().into_order();
        assert!(matches!(res, Err(ExchangeError::Other(_))));
    }

    #[test]
    fn test_tx_wire_status_mapping() {
        let accepted = TxWire {
            tx_hash: "0x1".into(),
            status: "ACCEPTED".into(),
            reason: None,
        };
        assert_eq!(accepted.into_result().unwrap(), TxId("0x1".into()));

        let rejected = TxWire {
            tx_hash: "0x2".into(),
            status: "REJECTED".into(),
            reason: Some("invalid transaction nonce".into()),
        };
        let err = rejected.into_result().unwrap_err();
        assert!(err.is_chain_rejection());
    }

    #[test]
    fn test_connector_requires_session_fields() {
        let mut session = SessionConfig::paper();
        assert!(GatewayConnector::new(session.clone()).is_err());
        session.gateway_url = "https://gateway.example".into();
        assert!(GatewayConnector::new(session).is_ok());
    }
}
