//! Property-based tests for the core exchange math.
//!
//! These tests verify invariants hold under random inputs.

use exchange_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $10,000
}

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|x| Decimal::new(x, 3)) // 0.001 to 10
}

fn ratio_strategy() -> impl Strategy<Value = MarginRatios> {
    (1i64..=20i64, 1i64..=10i64).prop_map(|(mm, extra)| {
        MarginRatios::new(Decimal::new(mm + extra, 3), Decimal::new(mm, 3))
    })
}

fn premium_strategy() -> impl Strategy<Value = Decimal> {
    (-1000i64..=1000i64).prop_map(|x| Decimal::new(x, 4)) // -10% to +10%
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn open(side: Side, quantity: Decimal, entry: Decimal, margin: Decimal) -> Position {
    let mut p = Position::empty(1, Decimal::ZERO, Timestamp::from_secs(0));
    p.apply_fill(side, quantity, entry, margin, Decimal::ZERO);
    p
}

proptest! {
    /// Unrealized PnL is zero when mark = entry
    #[test]
    fn pnl_zero_at_entry(
        side in side_strategy(),
        quantity in quantity_strategy(),
        entry in price_strategy(),
    ) {
        let position = open(side, quantity, entry, Decimal::ONE);
        prop_assert_eq!(position.unrealized_pnl(entry), Decimal::ZERO);
    }

    /// Longs gain when the mark rises, shorts lose the same amount
    #[test]
    fn pnl_mirrors_between_sides(
        quantity in quantity_strategy(),
        entry in price_strategy(),
        mark in price_strategy(),
    ) {
        let long = open(Side::Buy, quantity, entry, Decimal::ONE);
        let short = open(Side::Sell, quantity, entry, Decimal::ONE);
        prop_assert_eq!(long.unrealized_pnl(mark), -short.unrealized_pnl(mark));
        if mark > entry {
            prop_assert!(long.unrealized_pnl(mark) > Decimal::ZERO);
        }
    }

    /// Order margin never drops below the initial ratio of notional
    #[test]
    fn required_margin_covers_initial(
        side in side_strategy(),
        price in price_strategy(),
        quantity in quantity_strategy(),
        mark in price_strategy(),
        ratios in ratio_strategy(),
    ) {
        let price = Price::new_unchecked(price);
        let margin = required_margin(side, price, quantity, mark, ratios.initial).unwrap();
        prop_assert!(margin >= ratios.initial * notional_value(price, quantity).unwrap());
    }

    /// A fresh position at the mark with the initial margin is not liquidatable
    #[test]
    fn fresh_position_is_healthy(
        side in side_strategy(),
        entry in price_strategy(),
        quantity in quantity_strategy(),
        ratios in ratio_strategy(),
    ) {
        let price = Price::new_unchecked(entry);
        let margin = required_margin(side, price, quantity, entry, ratios.initial).unwrap();
        let position = open(side, quantity, entry, margin);
        prop_assert!(!is_liquidatable(&position, entry, ratios.maintenance, Decimal::ZERO));
    }

    /// Long liquidation price sits below entry, short above
    #[test]
    fn liquidation_price_on_losing_side(
        entry in price_strategy(),
        quantity in quantity_strategy(),
        ratios in ratio_strategy(),
    ) {
        let margin = ratios.initial * entry * quantity;
        let long = liquidation_price_from_margin(true, quantity, entry, margin, ratios.maintenance);
        let short = liquidation_price_from_margin(false, quantity, entry, margin, ratios.maintenance);
        prop_assert!(long.map_or(false, |p| p < entry));
        prop_assert!(short.map_or(false, |p| p > entry));
    }

    /// More margin pushes the long liquidation price further away
    #[test]
    fn more_margin_safer_long(
        entry in price_strategy(),
        quantity in quantity_strategy(),
        ratios in ratio_strategy(),
        extra in 1i64..1000i64,
    ) {
        let margin = ratios.initial * entry * quantity;
        let thin = liquidation_price_from_margin(true, quantity, entry, margin, ratios.maintenance);
        let thick = liquidation_price_from_margin(true, quantity, entry, margin + Decimal::from(extra), ratios.maintenance);
        prop_assert!(thick <= thin);
    }

    /// Funding rate stays inside the configured cap
    #[test]
    fn funding_rate_bounded(
        cumulative in (-10_000_000i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let params = FundingParams::default();
        let rate = funding_rate(cumulative, &params);
        prop_assert!(rate.abs() <= params.hourly_funding_rate_cap);
    }

    /// Whatever a long owes, the matching short receives
    #[test]
    fn funding_zero_sum(
        quantity in quantity_strategy(),
        entry in price_strategy(),
        index in (-100_000i64..100_000i64).prop_map(|x| Decimal::new(x, 4)),
    ) {
        let long = open(Side::Buy, quantity, entry, entry);
        let short = open(Side::Sell, quantity, entry, entry);
        prop_assert_eq!(long.pending_funding(index) + short.pending_funding(index), Decimal::ZERO);
    }

    /// The mark never leaves the premium band around the oracle
    #[test]
    fn mark_price_within_band(
        oracle in price_strategy(),
        bid_offset in premium_strategy(),
        spread in 0i64..200i64,
    ) {
        let params = MarkPriceParams::default();
        let bid = oracle * (Decimal::ONE + bid_offset);
        let ask = bid + oracle * Decimal::new(spread, 4);
        let mark = resolve_mark_price(Some(oracle), Some(bid), Some(ask), &params);
        prop_assert!(mark.is_some());
        let mark = mark.unwrap_or_default();
        prop_assert!(mark >= oracle * (Decimal::ONE - params.max_premium));
        prop_assert!(mark <= oracle * (Decimal::ONE + params.max_premium));
    }

    /// Closing a position returns margin plus pnl, nothing more
    #[test]
    fn close_pays_margin_plus_pnl(
        side in side_strategy(),
        quantity in quantity_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let margin = entry * quantity * dec!(0.1);
        let mut position = open(side, quantity, entry, margin);
        let expected = margin + position.unrealized_pnl(exit);
        let change = position.close_at(exit);
        prop_assert_eq!(change.payout(), expected);
        prop_assert!(position.is_empty());
        prop_assert_eq!(position.margin, Decimal::ZERO);
    }

    /// Positive payouts are split completely between liquidator and fund
    #[test]
    fn payout_split_is_exhaustive(
        payout in price_strategy(),
        has_liquidator in any::<bool>(),
    ) {
        let split = split_positive_payout(payout, has_liquidator, &LiquidationParams::default());
        prop_assert_eq!(split.liquidator + split.insurance_fund, payout);
        if !has_liquidator {
            prop_assert_eq!(split.liquidator, Decimal::ZERO);
        }
    }

    /// The owner is charged first and never beyond their free balance
    #[test]
    fn deficit_cover_respects_owner_balance(
        deficit in price_strategy(),
        available in price_strategy(),
    ) {
        let cover = cover_deficit(deficit, available);
        prop_assert_eq!(cover.from_owner + cover.from_insurance, deficit);
        prop_assert!(cover.from_owner <= available);
        prop_assert!(cover.from_insurance >= Decimal::ZERO);
    }

    /// Relayer and exchange shares add back to the fee
    #[test]
    fn fee_split_is_exhaustive(
        fee in price_strategy(),
        share in (0i64..=100i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let split = split_fee(fee, share, true);
        prop_assert_eq!(split.relayer + split.exchange, fee);
    }
}

#[cfg(test)]
mod stress_tests {
    use super::*;

    #[test]
    fn extreme_price_movements() {
        let position = open(Side::Buy, dec!(1), dec!(2000), dec!(100));
        assert!(is_liquidatable(&position, dec!(1), dec!(0.02), Decimal::ZERO));
        assert!(!is_liquidatable(&position, dec!(1_000_000), dec!(0.02), Decimal::ZERO));
    }

    #[test]
    fn fully_collateralised_long_has_zero_liquidation_price() {
        let position = open(Side::Buy, dec!(1), dec!(2000), dec!(2000));
        assert_eq!(liquidation_price(&position, dec!(0.02), Decimal::ZERO), Some(Decimal::ZERO));
    }

    #[test]
    fn flip_through_zero_opens_other_side() {
        let mut position = open(Side::Buy, dec!(5), dec!(100), dec!(50));
        let change = position.apply_fill(Side::Sell, dec!(8), dec!(110), dec!(33), Decimal::ZERO);
        assert_eq!(change.closed_quantity, dec!(5));
        assert_eq!(change.realized_pnl, dec!(50));
        assert_eq!(change.margin_released, dec!(50));
        assert!(!position.is_long);
        assert_eq!(position.quantity, dec!(3));
        assert_eq!(position.entry_price, dec!(110));
        assert_eq!(position.margin, dec!(33));
    }

    #[test]
    fn funding_accumulation_over_time() {
        let params = FundingParams::default();
        let mut state = FundingState::new(Timestamp::from_secs(0), params.interval);
        for hour in 1..=24 {
            let now = Timestamp::from_secs(hour * 3600);
            accrue_premium(&mut state, dec!(2100), dec!(2000), now);
            assert!(apply_funding_if_due(&mut state, &params, dec!(2000), now).is_some());
        }
        // a 5% premium is far above the cap, so every hour pays the cap
        assert_eq!(state.cumulative_funding, params.hourly_funding_rate_cap * dec!(2000) * dec!(24));
    }

    #[test]
    fn binary_margin_covers_payout_range() {
        let price = Price::new_unchecked(dec!(0.6));
        let buy = binary_options_margin(Side::Buy, price, dec!(100), Decimal::ONE).unwrap();
        let sell = binary_options_margin(Side::Sell, price, dec!(100), Decimal::ONE).unwrap();
        assert_eq!(buy + sell, dec!(100));
    }
}
