//! Liquidation conditions and payout distribution.
//!
//! A position is liquidatable once the mark price reaches the price at which
//! its funding-adjusted margin only just covers maintenance. The forced close
//! itself runs in the engine; this module holds the pure math around it.

use crate::position::Position;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// share of a positive liquidation payout that goes to the liquidator
    pub liquidator_reward_share_rate: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            liquidator_reward_share_rate: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Healthy { liquidation_price: Decimal },
    Liquidatable { liquidation_price: Decimal },
}

/// long:  (entry - margin / qty) / (1 - mmr)
/// short: (entry + margin / qty) / (1 + mmr)
pub fn liquidation_price_from_margin(
    is_long: bool,
    quantity: Decimal,
    entry_price: Decimal,
    margin: Decimal,
    maintenance_margin_ratio: Decimal,
) -> Option<Decimal> {
    if quantity.is_zero() {
        return None;
    }
    let per_unit = margin / quantity;
    let liq_price = if is_long {
        let denominator = Decimal::ONE - maintenance_margin_ratio;
        if denominator <= Decimal::ZERO {
            return None;
        }
        (entry_price - per_unit) / denominator
    } else {
        (entry_price + per_unit) / (Decimal::ONE + maintenance_margin_ratio)
    };
    // a long whose margin covers the whole entry can never be liquidated
    Some(liq_price.max(Decimal::ZERO))
}

pub fn liquidation_price(position: &Position, maintenance_margin_ratio: Decimal, cumulative_funding: Decimal) -> Option<Decimal> {
    liquidation_price_from_margin(
        position.is_long,
        position.quantity,
        position.entry_price,
        position.effective_margin(cumulative_funding),
        maintenance_margin_ratio,
    )
}

pub fn evaluate_position(
    position: &Position,
    mark_price: Decimal,
    maintenance_margin_ratio: Decimal,
    cumulative_funding: Decimal,
) -> Option<LiquidationStatus> {
    let liquidation_price = liquidation_price(position, maintenance_margin_ratio, cumulative_funding)?;
    let crossed = if position.is_long {
        mark_price <= liquidation_price
    } else {
        mark_price >= liquidation_price
    };
    Some(if crossed {
        LiquidationStatus::Liquidatable { liquidation_price }
    } else {
        LiquidationStatus::Healthy { liquidation_price }
    })
}

pub fn is_liquidatable(
    position: &Position,
    mark_price: Decimal,
    maintenance_margin_ratio: Decimal,
    cumulative_funding: Decimal,
) -> bool {
    matches!(
        evaluate_position(position, mark_price, maintenance_margin_ratio, cumulative_funding),
        Some(LiquidationStatus::Liquidatable { .. })
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayoutSplit {
    pub liquidator: Decimal,
    pub insurance_fund: Decimal,
}

// 6.1: the liquidated owner forfeits what is left. no liquidator => all to the fund
pub fn split_positive_payout(payout: Decimal, has_liquidator: bool, params: &LiquidationParams) -> PayoutSplit {
    if payout <= Decimal::ZERO {
        return PayoutSplit::default();
    }
    let liquidator = if has_liquidator {
        payout * params.liquidator_reward_share_rate
    } else {
        Decimal::ZERO
    };
    PayoutSplit {
        liquidator,
        insurance_fund: payout - liquidator,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeficitCover {
    pub from_owner: Decimal,
    pub from_insurance: Decimal,
}

// 6.2: the owner's free balance absorbs bad debt before the insurance fund does
pub fn cover_deficit(deficit: Decimal, owner_available: Decimal) -> DeficitCover {
    if deficit <= Decimal::ZERO {
        return DeficitCover::default();
    }
    let from_owner = deficit.min(owner_available.max(Decimal::ZERO));
    DeficitCover {
        from_owner,
        from_insurance: deficit - from_owner,
    }
}
