// 5.0: perpetual funding. mark vs oracle basis accumulates every block; once per
// funding interval it turns into an hourly rate and lands on the cumulative index.
// positions pay or receive the index delta lazily whenever they are touched.

use crate::types::Timestamp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingParams {
    pub hourly_interest_rate: Decimal,
    pub hourly_funding_rate_cap: Decimal,
    /// seconds between funding payments
    pub interval: i64,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            hourly_interest_rate: dec!(0.000004166666666667),
            hourly_funding_rate_cap: dec!(0.000625),
            interval: 3600,
        }
    }
}

impl FundingParams {
    pub fn is_valid(&self) -> bool {
        self.interval > 0
            && self.hourly_funding_rate_cap >= Decimal::ZERO
            && self.hourly_interest_rate.abs() <= self.hourly_funding_rate_cap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingState {
    /// sum of (mark - oracle) / oracle * seconds since the last payment
    pub cumulative_price: Decimal,
    /// running funding index, quote per unit of base
    pub cumulative_funding: Decimal,
    pub last_rate: Decimal,
    pub last_timestamp: Timestamp,
    pub next_funding_timestamp: Timestamp,
}

impl FundingState {
    pub fn new(launched_at: Timestamp, interval: i64) -> Self {
        Self {
            cumulative_price: Decimal::ZERO,
            cumulative_funding: Decimal::ZERO,
            last_rate: Decimal::ZERO,
            last_timestamp: launched_at,
            next_funding_timestamp: next_boundary(launched_at, interval),
        }
    }
}

/// First interval boundary strictly after `t`.
pub fn next_boundary(t: Timestamp, interval: i64) -> Timestamp {
    if interval <= 0 {
        return t;
    }
    Timestamp::from_secs((t.as_secs().div_euclid(interval) + 1) * interval)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingPayment {
    pub rate: Decimal,
    pub cumulative_funding: Decimal,
    pub timestamp: Timestamp,
}

// 5.1: premium accrual for the seconds elapsed since the last block
pub fn accrue_premium(state: &mut FundingState, mark: Decimal, oracle: Decimal, now: Timestamp) {
    if oracle <= Decimal::ZERO || now <= state.last_timestamp {
        return;
    }
    let elapsed = state.last_timestamp.secs_until(now);
    state.cumulative_price += (mark - oracle) / oracle * elapsed;
    state.last_timestamp = now;
}

// 5.2: hourly rate for one interval, clamped to the cap
pub fn funding_rate(cumulative_price: Decimal, params: &FundingParams) -> Decimal {
    let premium = cumulative_price / (Decimal::from(params.interval) * dec!(24));
    let cap = params.hourly_funding_rate_cap;
    (premium + params.hourly_interest_rate).max(-cap).min(cap)
}

// 5.3: pays out the interval if the boundary has been reached
pub fn apply_funding_if_due(
    state: &mut FundingState,
    params: &FundingParams,
    oracle: Decimal,
    now: Timestamp,
) -> Option<FundingPayment> {
    if now < state.next_funding_timestamp {
        return None;
    }
    let rate = funding_rate(state.cumulative_price, params);
    state.cumulative_funding += rate * oracle;
    state.cumulative_price = Decimal::ZERO;
    state.last_rate = rate;
    // one interval per payment. after a halt the missed boundaries are paid
    // on the following blocks, one each
    state.next_funding_timestamp = state.next_funding_timestamp.plus_secs(params.interval);
    Some(FundingPayment {
        rate,
        cumulative_funding: state.cumulative_funding,
        timestamp: now,
    })
}

// 5.4: what a position owes since its checkpoint. positive = long pays, short receives
pub fn pending_funding(quantity: Decimal, checkpoint: Decimal, cumulative_funding: Decimal) -> Decimal {
    quantity * (cumulative_funding - checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_accrues_per_second() {
        let mut state = FundingState::new(Timestamp::from_secs(0), 3600);
        accrue_premium(&mut state, dec!(101), dec!(100), Timestamp::from_secs(10));
        assert_eq!(state.cumulative_price, dec!(0.1));
        assert_eq!(state.last_timestamp, Timestamp::from_secs(10));
    }

    #[test]
    fn rate_is_capped() {
        let params = FundingParams::default();
        // wildly positive premium over the interval
        let rate = funding_rate(dec!(3600), &params);
        assert_eq!(rate, params.hourly_funding_rate_cap);
        let rate = funding_rate(dec!(-3600), &params);
        assert_eq!(rate, -params.hourly_funding_rate_cap);
    }

    #[test]
    fn zero_premium_pays_interest_only() {
        let params = FundingParams::default();
        let mut state = FundingState::new(Timestamp::from_secs(0), 3600);
        let paid = apply_funding_if_due(&mut state, &params, dec!(2000), Timestamp::from_secs(3600)).unwrap();
        assert_eq!(paid.rate, params.hourly_interest_rate);
        assert_eq!(state.cumulative_funding, params.hourly_interest_rate * dec!(2000));
        assert_eq!(state.next_funding_timestamp, Timestamp::from_secs(7200));
    }

    #[test]
    fn not_due_before_boundary() {
        let params = FundingParams::default();
        let mut state = FundingState::new(Timestamp::from_secs(10), 3600);
        assert!(apply_funding_if_due(&mut state, &params, dec!(2000), Timestamp::from_secs(3599)).is_none());
        assert_eq!(state.cumulative_funding, Decimal::ZERO);
    }

    #[test]
    fn missed_intervals_are_paid_one_per_call() {
        let params = FundingParams::default();
        let mut state = FundingState::new(Timestamp::from_secs(0), 3600);
        let late = Timestamp::from_secs(3 * 3600 + 10);

        for boundary in [7200, 10800, 14400] {
            assert!(apply_funding_if_due(&mut state, &params, dec!(2000), late).is_some());
            assert_eq!(state.next_funding_timestamp, Timestamp::from_secs(boundary));
        }
        assert!(apply_funding_if_due(&mut state, &params, dec!(2000), late).is_none());
        assert_eq!(state.cumulative_funding, params.hourly_interest_rate * dec!(2000) * dec!(3));
    }

    #[test]
    fn pending_funding_sign() {
        // long of 2 with index up by 0.5 owes 1
        assert_eq!(pending_funding(dec!(2), dec!(1), dec!(1.5)), dec!(1));
        assert_eq!(pending_funding(dec!(2), dec!(1.5), dec!(1)), dec!(-1));
    }
}
