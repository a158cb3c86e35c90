//! Common Types Module
//!
//! Shared domain types used across the codebase to avoid circular dependencies.
//! On-chain quantities (prices, amounts, tick/lot sizes) are fixed-point
//! integers scaled by `10^base_decimals`; human-readable values are `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Both sides, in the order reconciliation processes them.
    pub const ALL: [Side; 2] = [Side::Bid, Side::Ask];
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// Numeric market identifier assigned by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(pub u64);

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MarketId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Type-safe order identifier (exchange-assigned, opaque chain handle).
///
/// Newtype wrapper to prevent accidentally mixing order IDs with other
/// string types at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new OrderId from any string-like type.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        debug_assert!(!s.is_empty(), "OrderId cannot be empty");
        Self(s)
    }

    /// Get the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner String.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// On-chain token contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(String);

impl TokenId {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trading account address on chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Static per-market parameters, fetched once at startup and immutable
/// for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub market_id: MarketId,
    pub base_token: TokenId,
    pub quote_token: TokenId,
    /// Minimum price increment, scaled by `10^base_decimals`.
    pub tick_size: u128,
    /// Minimum amount increment, scaled by `10^base_decimals`.
    pub lot_size: u128,
    /// Fixed-point scale shared by prices and amounts on this market.
    pub base_decimals: u32,
}

/// An order previously submitted and still (partially) unfilled on the
/// exchange. Owned by the exchange; this side only reads and cancels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub id: OrderId,
    pub market_id: MarketId,
    pub side: Side,
    /// Limit price, scaled by `10^base_decimals`.
    pub price: u128,
    /// Unfilled amount, same scale as `price`.
    pub amount_remaining: u128,
}

/// Latest reference price for one market, re-fetched every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FairPrice {
    pub market_id: MarketId,
    /// Price in human units (e.g. 2000.5 quote per base).
    pub value: Decimal,
    /// Source feed event time, epoch milliseconds; latest timestamp wins
    /// within a feed response, nothing beyond that.
    pub timestamp: i64,
}

/// Convert a scaled on-chain integer to a human-units `Decimal`.
///
/// Returns `None` when the value exceeds `Decimal`'s 96-bit mantissa,
/// which only happens for corrupt chain data.
#[must_use]
pub fn scaled_to_decimal(value: u128, decimals: u32) -> Option<Decimal> {
    let v = i128::try_from(value).ok()?;
    Decimal::try_from_i128_with_scale(v, decimals).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_id_newtype() {
        let id = OrderId::new("0x3f2a");
        assert_eq!(id.as_str(), "0x3f2a");
        assert_eq!(id.to_string(), "0x3f2a");

        let id2: OrderId = "0xbeef".into();
        assert_eq!(id2.as_str(), "0xbeef");
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Bid.to_string(), "bid");
        assert_eq!(Side::Ask.to_string(), "ask");
    }

    #[test]
    fn test_scaled_to_decimal() {
        // 2000 * 10^18 scaled back to human units
        assert_eq!(
            scaled_to_decimal(2_000_000_000_000_000_000_000, 18),
            Some(dec!(2000))
        );
        // fractional values survive
        assert_eq!(
            scaled_to_decimal(1_500_000_000_000_000_000, 18),
            Some(dec!(1.5))
        );
        // zero is zero at any scale
        assert_eq!(scaled_to_decimal(0, 6), Some(dec!(0)));
        // beyond the 96-bit mantissa
        assert_eq!(scaled_to_decimal(u128::MAX, 18), None);
    }
}
