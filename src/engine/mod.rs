//! Quote Reconciliation Engine
//!
//! Pure decision logic: given the resting orders on one market, the latest
//! fair price, and the market's policy, compute which orders to cancel and
//! which new orders to create. Deterministic, with no I/O and no hidden
//! state; callers log and execute.
//!
//! Per side, in order: size filter, too-close filter, cap enforcement
//! (keep the closest N), then the creation test against the best surviving
//! order. Prices round away from fair so a fresh quote is never more
//! aggressive than the configured target distance.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::Policy;
use crate::types::{scaled_to_decimal, FairPrice, MarketConfig, MarketId, RestingOrder, Side};

/// Errors from reconciliation. All of them mean "skip this market's
/// cycle"; none require recovery.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fair price {price} for market {market_id} is not positive")]
    InvalidFairPrice { market_id: MarketId, price: Decimal },

    #[error("market {market_id} has degenerate parameters: {reason}")]
    InvalidMarket {
        market_id: MarketId,
        reason: &'static str,
    },

    #[error("policy for market {market_id} is degenerate: {reason}")]
    InvalidPolicy {
        market_id: MarketId,
        reason: &'static str,
    },

    #[error("numeric overflow while computing {context}")]
    Overflow { context: &'static str },
}

/// A fully quantized order to place: price is a multiple of the market's
/// tick size, amount a multiple of its lot size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderIntent {
    pub side: Side,
    /// Limit price, scaled by `10^base_decimals`.
    pub price: u128,
    /// Order amount, same scale.
    pub amount: u128,
}

/// Output of one reconciliation pass over one market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteDecision {
    /// Orders to cancel, bid side first, in inspection order.
    pub cancel: Vec<RestingOrder>,
    /// Orders to place, at most one per side.
    pub create: Vec<NewOrderIntent>,
}

impl QuoteDecision {
    pub fn is_empty(&self) -> bool {
        self.cancel.is_empty() && self.create.is_empty()
    }
}

/// Reconcile one market's resting orders against the fair price.
///
/// Orders for other markets are the caller's problem; `orders` must
/// already be filtered to `market.market_id`.
pub fn reconcile(
    orders: &[RestingOrder],
    fair: &FairPrice,
    policy: &Policy,
    market: &MarketConfig,
) -> Result<QuoteDecision, EngineError> {
    if fair.value <= Decimal::ZERO {
        return Err(EngineError::InvalidFairPrice {
            market_id: market.market_id,
            price: fair.value,
        });
    }
    if market.tick_size == 0 {
        return Err(EngineError::InvalidMarket {
            market_id: market.market_id,
            reason: "tick size is zero",
        });
    }
    if market.lot_size == 0 {
        return Err(EngineError::InvalidMarket {
            market_id: market.market_id,
            reason: "lot size is zero",
        });
    }

    let mut decision = QuoteDecision::default();
    for side in Side::ALL {
        reconcile_side(side, orders, fair.value, policy, market, &mut decision)?;
    }
    Ok(decision)
}

fn reconcile_side(
    side: Side,
    orders: &[RestingOrder],
    fair: Decimal,
    policy: &Policy,
    market: &MarketConfig,
    decision: &mut QuoteDecision,
) -> Result<(), EngineError> {
    let decimals = market.base_decimals;
    let mut survivors: Vec<(&RestingOrder, Decimal)> = Vec::new();

    for order in orders.iter().filter(|o| o.side == side) {
        let price = scaled_to_decimal(order.price, decimals).ok_or(EngineError::Overflow {
            context: "resting order price",
        })?;
        let amount =
            scaled_to_decimal(order.amount_remaining, decimals).ok_or(EngineError::Overflow {
                context: "resting order amount",
            })?;
        let quote_value = amount.checked_mul(price).ok_or(EngineError::Overflow {
            context: "resting order quote value",
        })?;
        if quote_value < policy.minimal_remaining_quote_value {
            decision.cancel.push(order.clone());
            continue;
        }

        let distance = relative_distance(price, fair).ok_or(EngineError::Overflow {
            context: "relative distance",
        })?;
        if distance < policy.min_relative_distance {
            decision.cancel.push(order.clone());
            continue;
        }

        survivors.push((order, distance));
    }

    // Keep the closest max_orders_per_side, cancel the rest.
    survivors.sort_by(|a, b| a.1.cmp(&b.1));
    let cap = policy.max_orders_per_side.min(survivors.len());
    for (order, _) in survivors.split_off(cap) {
        decision.cancel.push(order.clone());
    }

    if policy.max_orders_per_side == 0 {
        // Cancellation-only market; never quotes.
        return Ok(());
    }

    // Creation test against the best survivor, recomputed from what
    // actually survived the filters above.
    let best_distance = survivors.first().map(|(_, distance)| *distance);
    let wants_quote = match best_distance {
        None => true,
        Some(distance) => distance > policy.max_relative_distance,
    };
    if wants_quote {
        if let Some(intent) = build_intent(side, fair, policy, market)? {
            decision.create.push(intent);
        }
    }
    Ok(())
}

/// Build the replacement quote for one side: price at the target distance
/// quantized away from fair, amount sized from the policy notional and
/// quantized down to the lot. Returns `None` when the lot-quantized
/// amount is zero (order size below one lot at this price).
fn build_intent(
    side: Side,
    fair: Decimal,
    policy: &Policy,
    market: &MarketConfig,
) -> Result<Option<NewOrderIntent>, EngineError> {
    let offset = match side {
        Side::Ask => Decimal::ONE + policy.target_relative_distance,
        Side::Bid => Decimal::ONE - policy.target_relative_distance,
    };
    let target = fair.checked_mul(offset).ok_or(EngineError::Overflow {
        context: "target price",
    })?;
    if target <= Decimal::ZERO {
        return Err(EngineError::InvalidPolicy {
            market_id: market.market_id,
            reason: "target distance pushes the bid price to or below zero",
        });
    }

    let scale = pow10_decimal(market.base_decimals).ok_or(EngineError::Overflow {
        context: "fixed-point scale",
    })?;
    let raw = target.checked_mul(scale).ok_or(EngineError::Overflow {
        context: "scaled target price",
    })?;

    let price = match side {
        Side::Ask => ceil_to_tick(raw, market.tick_size),
        Side::Bid => floor_to_tick(raw, market.tick_size),
    }
    .ok_or(EngineError::Overflow {
        context: "tick quantization",
    })?;
    if price == 0 {
        return Ok(None);
    }

    let price_human = scaled_to_decimal(price, market.base_decimals).ok_or(EngineError::Overflow {
        context: "quantized price",
    })?;
    let amount_raw = policy
        .order_dollar_size
        .checked_div(price_human)
        .ok_or(EngineError::Overflow {
            context: "order amount",
        })?;
    let amount_floor = amount_raw.trunc().to_u128().ok_or(EngineError::Overflow {
        context: "order amount",
    })?;
    let amount = amount_floor - amount_floor % market.lot_size;
    if amount == 0 {
        return Ok(None);
    }

    Ok(Some(NewOrderIntent {
        side,
        price,
        amount,
    }))
}

fn relative_distance(price: Decimal, fair: Decimal) -> Option<Decimal> {
    price.checked_sub(fair)?.abs().checked_div(fair)
}

fn pow10_decimal(decimals: u32) -> Option<Decimal> {
    if decimals > 28 {
        return None;
    }
    let v = 10u128.checked_pow(decimals)?;
    Decimal::try_from_i128_with_scale(v as i128, 0).ok()
}

/// Round a positive scaled price up to the next tick boundary.
fn ceil_to_tick(raw: Decimal, tick: u128) -> Option<u128> {
    let floor = raw.trunc().to_u128()?;
    let rem = floor % tick;
    if rem == 0 {
        if raw.fract().is_zero() {
            Some(floor)
        } else {
            floor.checked_add(tick)
        }
    } else {
        floor.checked_sub(rem)?.checked_add(tick)
    }
}

/// Round a positive scaled price down to the previous tick boundary.
fn floor_to_tick(raw: Decimal, tick: u128) -> Option<u128> {
    let floor = raw.trunc().to_u128()?;
    Some(floor - floor % tick)
}
