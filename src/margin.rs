//! Margin requirements for derivative orders.
//!
//! Perpetual and expiry-futures orders must post at least the initial
//! margin on their notional, and must also survive the current mark price:
//! a buy above mark (or a sell below it) carries the gap as extra margin.
//! Binary options are fully collateralised inside `(0, scale)`.

use crate::types::{Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRatios {
    pub initial: Decimal,
    pub maintenance: Decimal,
}

impl MarginRatios {
    pub fn new(initial: Decimal, maintenance: Decimal) -> Self {
        Self {
            initial,
            maintenance,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.maintenance > Decimal::ZERO
            && self.initial > self.maintenance
            && self.initial < Decimal::ONE
    }
}

impl Default for MarginRatios {
    fn default() -> Self {
        Self {
            initial: dec!(0.05),
            maintenance: dec!(0.02),
        }
    }
}

/// Price times quantity. `None` once the product leaves the decimal range;
/// every helper below inherits that.
pub fn notional_value(price: Price, quantity: Decimal) -> Option<Decimal> {
    price.value().checked_mul(quantity)
}

/// 3.1: minimum margin for a perpetual / expiry-futures order.
///
/// buy:  max(imr * notional, qty * (price - mark * (1 - imr)))
/// sell: max(imr * notional, qty * (mark * (1 + imr) - price))
pub fn required_margin(
    side: Side,
    price: Price,
    quantity: Decimal,
    mark_price: Decimal,
    initial_margin_ratio: Decimal,
) -> Option<Decimal> {
    let base = initial_margin_ratio.checked_mul(notional_value(price, quantity)?)?;
    let gap = match side {
        Side::Buy => price
            .value()
            .checked_sub(mark_price.checked_mul(Decimal::ONE - initial_margin_ratio)?)?,
        Side::Sell => mark_price
            .checked_mul(Decimal::ONE + initial_margin_ratio)?
            .checked_sub(price.value())?,
    };
    Some(base.max(quantity.checked_mul(gap)?))
}

/// 3.2: binary options post the whole payout range of their side.
pub fn binary_options_margin(side: Side, price: Price, quantity: Decimal, scale: Decimal) -> Option<Decimal> {
    match side {
        Side::Buy => notional_value(price, quantity),
        Side::Sell => scale.checked_sub(price.value())?.checked_mul(quantity),
    }
}

/// Worst-case taker fee an order can be charged. Negative rates reserve nothing.
pub fn fee_reserve(price: Price, quantity: Decimal, taker_fee_rate: Decimal) -> Option<Decimal> {
    notional_value(price, quantity)?.checked_mul(taker_fee_rate.max(Decimal::ZERO))
}

/// Pro-rata slice of an escrow for `filled` out of `total` quantity.
pub fn pro_rata(amount: Decimal, filled: Decimal, total: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    if filled >= total {
        return amount;
    }
    amount * filled / total
}
