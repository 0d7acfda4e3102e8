// 13.0: mark price resolution. the oracle anchors everything; a liquid book mid
// may pull the mark away from it, but only inside the ±max_premium band.
// no oracle price means no mark price. callers fail closed on None.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPriceParams {
    pub max_premium: Decimal,
    /// book counts as liquid when (ask - bid) / oracle is at most this
    pub max_spread_ratio: Decimal,
}

impl Default for MarkPriceParams {
    fn default() -> Self {
        Self {
            max_premium: dec!(0.05),
            max_spread_ratio: dec!(0.01),
        }
    }
}

pub fn calculate_raw_premium(mid_price: Decimal, oracle_price: Decimal) -> Decimal {
    (mid_price - oracle_price) / oracle_price
}

pub fn clamp_premium(premium: Decimal, max_premium: Decimal) -> Decimal {
    premium.max(-max_premium).min(max_premium)
}

pub fn is_liquid(best_bid: Decimal, best_ask: Decimal, oracle_price: Decimal, params: &MarkPriceParams) -> bool {
    if best_ask < best_bid {
        // crossed book mid-block, the batch has not run yet
        return false;
    }
    (best_ask - best_bid) / oracle_price <= params.max_spread_ratio
}

// 13.1: oracle, or the clamped book mid when both sides are tight
pub fn resolve_mark_price(
    oracle_price: Option<Decimal>,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    params: &MarkPriceParams,
) -> Option<Decimal> {
    let oracle = oracle_price.filter(|p| *p > Decimal::ZERO)?;
    let (bid, ask) = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => (bid, ask),
        _ => return Some(oracle),
    };
    if !is_liquid(bid, ask, oracle, params) {
        return Some(oracle);
    }
    let mid = (bid + ask) / Decimal::TWO;
    let premium = clamp_premium(calculate_raw_premium(mid, oracle), params.max_premium);
    Some(oracle * (Decimal::ONE + premium))
}
