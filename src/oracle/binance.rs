//! Binance aggregated-trades oracle.
//!
//! Fair price is the price of the most recent aggregated trade for the
//! market's symbol. Binance serves these from the public data API with
//! no authentication, so the same feed works for live and paper runs.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::oracle::{OracleError, PriceOracle};
use crate::types::{FairPrice, MarketId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How many recent aggregated trades to fetch per request. Only the
/// newest one is used; the margin covers out-of-order delivery.
const TRADE_FETCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct AggTradeWire {
    #[serde(rename = "p")]
    price: String,
    /// Trade time, milliseconds since epoch.
    #[serde(rename = "T")]
    time: i64,
}

pub struct BinanceOracle {
    http: reqwest::Client,
    base_url: String,
    symbols: BTreeMap<u64, String>,
}

impl BinanceOracle {
    pub fn new(
        base_url: impl Into<String>,
        symbols: BTreeMap<u64, String>,
    ) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OracleError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            symbols,
        })
    }

    /// Build the oracle from app config, one symbol per configured market.
    pub fn from_config(config: &AppConfig) -> Result<Self, OracleError> {
        let symbols = config
            .markets
            .iter()
            .map(|(id, entry)| (*id, entry.oracle_symbol.clone()))
            .collect();
        Self::new(config.oracle_url.clone(), symbols)
    }

    fn symbol(&self, market_id: MarketId) -> Result<&str, OracleError> {
        self.symbols
            .get(&market_id.0)
            .map(String::as_str)
            .ok_or(OracleError::UnknownMarket(market_id))
    }
}

#[async_trait]
impl PriceOracle for BinanceOracle {
    async fn get_fair_price(&self, market_id: MarketId) -> Result<FairPrice, OracleError> {
        let symbol = self.symbol(market_id)?;
        let url = format!("{}/api/v3/aggTrades", self.base_url);
        let limit = TRADE_FETCH_LIMIT.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[("symbol", symbol), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Network(format!(
                "aggTrades for {} returned {}",
                symbol, status
            )));
        }

        let trades: Vec<AggTradeWire> = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        let fair = fair_from_trades(market_id, symbol, &trades)?;
        debug!(
            market_id = %market_id,
            symbol,
            price = %fair.value,
            timestamp = fair.timestamp,
            "fetched fair price"
        );
        Ok(fair)
    }
}

/// Pick the newest trade by exchange timestamp and parse its price.
fn fair_from_trades(
    market_id: MarketId,
    symbol: &str,
    trades: &[AggTradeWire],
) -> Result<FairPrice, OracleError> {
    let latest = trades
        .iter()
        .max_by_key(|t| t.time)
        .ok_or_else(|| OracleError::NoData {
            symbol: symbol.to_string(),
        })?;

    let value = Decimal::from_str(&latest.price).map_err(|e| {
        OracleError::Malformed(format!("price {:?} for {}: {}", latest.price, symbol, e))
    })?;
    if value <= Decimal::ZERO {
        return Err(OracleError::Malformed(format!(
            "non-positive price {} for {}",
            value, symbol
        )));
    }

    Ok(FairPrice {
        market_id,
        value,
        timestamp: latest.time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(body: &str) -> Vec<AggTradeWire> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_latest_trade_wins_regardless_of_order() {
        let trades = parse(
            r#"[
                {"a": 1, "p": "2001.50", "q": "0.3", "T": 1700000000500},
                {"a": 3, "p": "2003.25", "q": "0.1", "T": 1700000002000},
                {"a": 2, "p": "1999.00", "q": "1.2", "T": 1700000001000}
            ]"#,
        );

        let fair = fair_from_trades(MarketId(1), "ETHUSDC", &trades).unwrap();
        assert_eq!(fair.value, dec!(2003.25));
        assert_eq!(fair.timestamp, 1_700_000_002_000);
        assert_eq!(fair.market_id, MarketId(1));
    }

    #[test]
    fn test_empty_trade_list_is_no_data() {
        let err = fair_from_trades(MarketId(1), "ETHUSDC", &[]).unwrap_err();
        assert!(matches!(err, OracleError::NoData { .. }));
    }

    #[test]
    fn test_unparseable_price_is_malformed() {
        let trades = parse(r#"[{"p": "not-a-price", "T": 1700000000000}]"#);
        let err = fair_from_trades(MarketId(1), "ETHUSDC", &trades).unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn test_zero_price_is_rejected() {
        let trades = parse(r#"[{"p": "0.00", "T": 1700000000000}]"#);
        let err = fair_from_trades(MarketId(1), "ETHUSDC", &trades).unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn test_unknown_market_has_no_symbol() {
        let oracle = BinanceOracle::new("https://data-api.binance.vision", BTreeMap::new()).unwrap();
        let err = oracle.symbol(MarketId(9)).unwrap_err();
        assert!(matches!(err, OracleError::UnknownMarket(MarketId(9))));
    }
}
