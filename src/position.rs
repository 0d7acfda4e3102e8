// 4.0: open position tracking. one per (market, subaccount), netted on every fill.
// 4.1 has the fill logic: extend, reduce, close, or flip through zero.

use crate::funding::pending_funding;
use crate::margin::pro_rata;
use crate::types::{Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub is_long: bool,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
    /// market cumulative funding at the last settlement
    pub funding_checkpoint: Decimal,
    /// insertion order within the market, drives sweep order
    pub sequence: u64,
    pub opened_at: Timestamp,
}

/// What a fill did to a position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionChange {
    pub closed_quantity: Decimal,
    pub opened_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub margin_released: Decimal,
}

impl PositionChange {
    /// Value returned to the owner by the closing part.
    pub fn payout(&self) -> Decimal {
        self.margin_released + self.realized_pnl
    }
}

impl Position {
    pub fn empty(sequence: u64, funding_checkpoint: Decimal, opened_at: Timestamp) -> Self {
        Self {
            is_long: true,
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            margin: Decimal::ZERO,
            funding_checkpoint,
            sequence,
            opened_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn side(&self) -> Option<Side> {
        if self.is_empty() {
            None
        } else if self.is_long {
            Some(Side::Buy)
        } else {
            Some(Side::Sell)
        }
    }

    fn direction(&self) -> Decimal {
        if self.is_long {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        }
    }

    /// Side that shrinks this position, if any.
    pub fn closing_side(&self) -> Option<Side> {
        self.side().map(|s| s.opposite())
    }

    /// How much of a `side` fill of `quantity` nets against the position.
    pub fn closing_quantity(&self, side: Side, quantity: Decimal) -> Decimal {
        if self.closing_side() == Some(side) {
            quantity.min(self.quantity)
        } else {
            Decimal::ZERO
        }
    }

    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        self.quantity * (mark_price - self.entry_price) * self.direction()
    }

    pub fn pending_funding(&self, cumulative_funding: Decimal) -> Decimal {
        // longs pay a rising index, shorts collect it
        pending_funding(self.quantity, self.funding_checkpoint, cumulative_funding) * self.direction()
    }

    /// Margin after pending funding, before any PnL.
    pub fn effective_margin(&self, cumulative_funding: Decimal) -> Decimal {
        self.margin - self.pending_funding(cumulative_funding)
    }

    // 4.1: realize funding into margin and move the checkpoint
    pub fn settle_funding(&mut self, cumulative_funding: Decimal) -> Decimal {
        let owed = self.pending_funding(cumulative_funding);
        self.margin -= owed;
        self.funding_checkpoint = cumulative_funding;
        -owed
    }

    // 4.2: apply one fill. closing part realizes pnl and releases margin pro rata;
    // opening part extends (weighted entry) or starts a fresh position
    pub fn apply_fill(
        &mut self,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        opening_margin: Decimal,
        cumulative_funding: Decimal,
    ) -> PositionChange {
        let mut change = PositionChange::default();

        let closed = self.closing_quantity(side, quantity);
        if closed > Decimal::ZERO {
            change.closed_quantity = closed;
            change.realized_pnl = (price - self.entry_price) * closed * self.direction();
            change.margin_released = pro_rata(self.margin, closed, self.quantity);
            self.margin -= change.margin_released;
            self.quantity -= closed;
            if self.quantity.is_zero() {
                self.margin = Decimal::ZERO;
                self.entry_price = Decimal::ZERO;
            }
        }

        let opened = quantity - closed;
        if opened > Decimal::ZERO {
            change.opened_quantity = opened;
            if self.is_empty() {
                self.is_long = side.is_buy();
                self.entry_price = price;
                self.quantity = opened;
                self.funding_checkpoint = cumulative_funding;
            } else {
                let total = self.quantity + opened;
                self.entry_price = (self.entry_price * self.quantity + price * opened) / total;
                self.quantity = total;
            }
            self.margin += opening_margin;
        }

        change
    }

    /// Close everything at `price`. returns the owner's payout (may be negative).
    pub fn close_at(&mut self, price: Decimal) -> PositionChange {
        let side = match self.closing_side() {
            Some(side) => side,
            None => return PositionChange::default(),
        };
        let quantity = self.quantity;
        self.apply_fill(side, quantity, price, Decimal::ZERO, self.funding_checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long(qty: Decimal, entry: Decimal, margin: Decimal) -> Position {
        let mut p = Position::empty(1, Decimal::ZERO, Timestamp::from_secs(0));
        p.apply_fill(Side::Buy, qty, entry, margin, Decimal::ZERO);
        p
    }

    #[test]
    fn open_from_empty() {
        let p = long(dec!(1), dec!(2010), dec!(110));
        assert!(p.is_long);
        assert_eq!(p.quantity, dec!(1));
        assert_eq!(p.entry_price, dec!(2010));
        assert_eq!(p.margin, dec!(110));
    }

    #[test]
    fn extend_averages_entry() {
        let mut p = long(dec!(1), dec!(100), dec!(10));
        let change = p.apply_fill(Side::Buy, dec!(3), dec!(120), dec!(30), Decimal::ZERO);
        assert_eq!(change.closed_quantity, dec!(0));
        assert_eq!(p.quantity, dec!(4));
        assert_eq!(p.entry_price, dec!(115));
        assert_eq!(p.margin, dec!(40));
    }

    #[test]
    fn partial_close_realizes_pnl() {
        let mut p = long(dec!(4), dec!(100), dec!(40));
        let change = p.apply_fill(Side::Sell, dec!(1), dec!(110), dec!(0), Decimal::ZERO);
        assert_eq!(change.realized_pnl, dec!(10));
        assert_eq!(change.margin_released, dec!(10));
        assert_eq!(change.payout(), dec!(20));
        assert_eq!(p.quantity, dec!(3));
        assert_eq!(p.entry_price, dec!(100));
    }

    #[test]
    fn flip_through_zero() {
        let mut p = long(dec!(2), dec!(100), dec!(20));
        let change = p.apply_fill(Side::Sell, dec!(5), dec!(90), dec!(27), Decimal::ZERO);
        assert_eq!(change.closed_quantity, dec!(2));
        assert_eq!(change.opened_quantity, dec!(3));
        assert_eq!(change.realized_pnl, dec!(-20));
        assert!(!p.is_long);
        assert_eq!(p.quantity, dec!(3));
        assert_eq!(p.entry_price, dec!(90));
        assert_eq!(p.margin, dec!(27));
    }

    #[test]
    fn short_pnl_sign() {
        let mut p = Position::empty(1, Decimal::ZERO, Timestamp::from_secs(0));
        p.apply_fill(Side::Sell, dec!(2), dec!(100), dec!(20), Decimal::ZERO);
        assert_eq!(p.unrealized_pnl(dec!(90)), dec!(20));
        let change = p.close_at(dec!(90));
        assert_eq!(change.payout(), dec!(40));
        assert!(p.is_empty());
    }

    #[test]
    fn funding_moves_margin() {
        let mut p = long(dec!(2), dec!(100), dec!(20));
        // index up 0.5 => long pays 1
        assert_eq!(p.pending_funding(dec!(0.5)), dec!(1));
        assert_eq!(p.settle_funding(dec!(0.5)), dec!(-1));
        assert_eq!(p.margin, dec!(19));
        assert_eq!(p.funding_checkpoint, dec!(0.5));

        let mut s = Position::empty(2, Decimal::ZERO, Timestamp::from_secs(0));
        s.apply_fill(Side::Sell, dec!(2), dec!(100), dec!(20), Decimal::ZERO);
        assert_eq!(s.settle_funding(dec!(0.5)), dec!(1));
        assert_eq!(s.margin, dec!(21));
    }
}
