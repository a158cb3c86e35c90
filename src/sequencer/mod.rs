//! Nonce Sequencer
//!
//! Turns a `QuoteDecision` into the ordered list of chain operations with
//! a nonce assigned to each: cancellations first (one nonce apiece), then
//! approve+submit pairs per new order. Pure arithmetic; execution and
//! confirmation are the caller's job.
//!
//! The account nonce is a single shared resource across all markets, so
//! exactly one `NonceCounter` exists per account and is passed in by
//! mutable reference. It deliberately does not implement `Clone`.

use thiserror::Error;

use crate::engine::QuoteDecision;
use crate::types::{MarketConfig, MarketId, OrderId, Side, TokenId};

/// Errors from sequencing. Pure arithmetic; nothing here touches the
/// chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("transaction nonce sequence exhausted at {at}")]
    NonceExhaustion { at: u64 },

    #[error("quote notional overflow for amount {amount} at price {price}")]
    NotionalOverflow { amount: u128, price: u128 },

    #[error("unsupported base decimals {0}")]
    InvalidDecimals(u32),
}

/// Single-owner counter over the account's next unused nonce.
#[derive(Debug)]
pub struct NonceCounter {
    next: u64,
}

impl NonceCounter {
    #[must_use]
    pub fn new(next_unused: u64) -> Self {
        Self { next: next_unused }
    }

    /// Take the next nonce, advancing the counter.
    pub fn allocate(&mut self) -> Result<u64, SequenceError> {
        let nonce = self.next;
        self.next = self
            .next
            .checked_add(1)
            .ok_or(SequenceError::NonceExhaustion { at: nonce })?;
        Ok(nonce)
    }

    /// The next unused nonce, without consuming it.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Re-align with the chain after recovery or session re-establishment.
    pub fn reset(&mut self, next_unused: u64) {
        self.next = next_unused;
    }
}

/// One chain operation, without its nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOp {
    Cancel {
        order_id: OrderId,
    },
    Approve {
        token: TokenId,
        amount: u128,
    },
    Submit {
        market_id: MarketId,
        token: TokenId,
        price: u128,
        amount: u128,
        side: Side,
    },
}

impl ChainOp {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainOp::Cancel { .. } => "cancel",
            ChainOp::Approve { .. } => "approve",
            ChainOp::Submit { .. } => "submit",
        }
    }
}

/// A chain operation tagged with its assigned nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedOp {
    pub nonce: u64,
    pub op: ChainOp,
}

/// Ordered batch for one market, one cycle. Consumed by the exchange
/// client in order; discarded after execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBatch {
    pub ops: Vec<SequencedOp>,
    /// First unused nonce after the batch, so further operations can be
    /// chained without re-querying the chain.
    pub next_nonce: u64,
}

impl OperationBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Assign nonces to a decision's operations.
///
/// Cancellations come first in decision order, then per creation an
/// approval sized to the worst-case fill (asks approve the base amount,
/// bids the full quote notional) immediately followed by the submission.
pub fn sequence(
    decision: &QuoteDecision,
    market: &MarketConfig,
    counter: &mut NonceCounter,
) -> Result<OperationBatch, SequenceError> {
    let mut ops = Vec::with_capacity(decision.cancel.len() + 2 * decision.create.len());

    for order in &decision.cancel {
        ops.push(SequencedOp {
            nonce: counter.allocate()?,
            op: ChainOp::Cancel {
                order_id: order.id.clone(),
            },
        });
    }

    for intent in &decision.create {
        let (token, approve_amount) = match intent.side {
            Side::Ask => (market.base_token.clone(), intent.amount),
            Side::Bid => (
                market.quote_token.clone(),
                quote_notional(intent.amount, intent.price, market.base_decimals)?,
            ),
        };
        ops.push(SequencedOp {
            nonce: counter.allocate()?,
            op: ChainOp::Approve {
                token: token.clone(),
                amount: approve_amount,
            },
        });
        ops.push(SequencedOp {
            nonce: counter.allocate()?,
            op: ChainOp::Submit {
                market_id: market.market_id,
                token,
                price: intent.price,
                amount: intent.amount,
                side: intent.side,
            },
        });
    }

    Ok(OperationBatch {
        ops,
        next_nonce: counter.peek(),
    })
}

/// Quote-side notional `amount * price / 10^decimals`, in the exchange's
/// fixed-point scale.
///
/// The naive product overflows u128 for everyday sizes (1 base unit at
/// price 2000 in 18-decimal scale is ~2e39), so the multiplication is
/// split around the scale. The result is the exact floored notional
/// whenever it fits in u128 at all.
fn quote_notional(amount: u128, price: u128, decimals: u32) -> Result<u128, SequenceError> {
    let scale = 10u128
        .checked_pow(decimals)
        .ok_or(SequenceError::InvalidDecimals(decimals))?;
    let overflow = || SequenceError::NotionalOverflow { amount, price };

    // amount = a_whole*scale + a_frac, price = p_whole*scale + p_frac:
    // amount*price/scale == a_whole*price + a_frac*p_whole + a_frac*p_frac/scale
    let a_whole = amount / scale;
    let a_frac = amount % scale;
    let p_whole = price / scale;
    let p_frac = price % scale;

    let whole_term = a_whole.checked_mul(price).ok_or_else(overflow)?;
    let cross_term = a_frac.checked_mul(p_whole).ok_or_else(overflow)?;
    let frac_term = a_frac
        .checked_mul(p_frac)
        .map(|product| product / scale)
        .ok_or_else(overflow)?;

    whole_term
        .checked_add(cross_term)
        .and_then(|sum| sum.checked_add(frac_term))
        .ok_or_else(overflow)
}
