// 7.2: fee rates after discounts, fee routing, and trading reward points.
// the discount schedule and reward campaign are installed by proposal; the
// matching path only ever asks for the effective rate of one side of a fill.

use crate::market::Market;
use crate::types::{Denom, MarketId, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDiscountTier {
    /// cumulative traded notional needed to reach this tier
    pub min_volume: Decimal,
    pub maker_discount_rate: Decimal,
    pub taker_discount_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDiscountSchedule {
    pub quote_denoms: Vec<Denom>,
    /// ascending by min_volume
    pub tiers: Vec<FeeDiscountTier>,
}

impl FeeDiscountSchedule {
    pub fn validate(&self) -> Result<(), String> {
        let mut last = Decimal::MIN;
        for tier in &self.tiers {
            if tier.min_volume < last {
                return Err("tiers must be sorted by min_volume".to_string());
            }
            for rate in [tier.maker_discount_rate, tier.taker_discount_rate] {
                if rate < Decimal::ZERO || rate > Decimal::ONE {
                    return Err(format!("discount rate {rate} outside [0, 1]"));
                }
            }
            last = tier.min_volume;
        }
        Ok(())
    }

    pub fn tier_for(&self, volume: Decimal) -> Option<&FeeDiscountTier> {
        self.tiers.iter().rev().find(|t| volume >= t.min_volume)
    }
}

/// Effective rate for one side of a fill. rebates (negative rates) are never discounted.
pub fn effective_fee_rate(
    market: &Market,
    is_maker: bool,
    schedule: Option<&FeeDiscountSchedule>,
    volume: Decimal,
) -> Decimal {
    let base = if is_maker {
        market.maker_fee_rate
    } else {
        market.taker_fee_rate
    };
    if base <= Decimal::ZERO {
        return base;
    }
    let tier = schedule
        .filter(|s| s.quote_denoms.contains(&market.quote_denom))
        .and_then(|s| s.tier_for(volume));
    match tier {
        Some(tier) => {
            let discount = if is_maker {
                tier.maker_discount_rate
            } else {
                tier.taker_discount_rate
            };
            base * (Decimal::ONE - discount)
        }
        None => base,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeSplit {
    pub relayer: Decimal,
    pub exchange: Decimal,
}

/// Positive fees share with the relayer when the order names one.
pub fn split_fee(fee: Decimal, relayer_fee_share_rate: Decimal, has_relayer: bool) -> FeeSplit {
    if fee <= Decimal::ZERO || !has_relayer {
        return FeeSplit {
            relayer: Decimal::ZERO,
            exchange: fee,
        };
    }
    let relayer = fee * relayer_fee_share_rate;
    FeeSplit {
        relayer,
        exchange: fee - relayer,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingRewardCampaign {
    pub quote_denoms: Vec<Denom>,
    /// markets whose fees count extra
    pub boosted_markets: BTreeMap<MarketId, Decimal>,
    pub start: Timestamp,
    /// seconds
    pub duration: i64,
}

impl TradingRewardCampaign {
    pub fn validate(&self) -> Result<(), String> {
        if self.duration <= 0 {
            return Err("campaign duration must be positive".to_string());
        }
        if self.quote_denoms.is_empty() {
            return Err("campaign needs at least one quote denom".to_string());
        }
        if self.boosted_markets.values().any(|m| *m < Decimal::ZERO) {
            return Err("boost multipliers must be non-negative".to_string());
        }
        Ok(())
    }

    pub fn is_running(&self, now: Timestamp) -> bool {
        now >= self.start && now < self.start.plus_secs(self.duration)
    }

    /// Points earned for paying `fee` on `market` at `now`.
    pub fn points_for(&self, market: &Market, fee: Decimal, now: Timestamp) -> Decimal {
        if fee <= Decimal::ZERO || !self.is_running(now) || !self.quote_denoms.contains(&market.quote_denom) {
            return Decimal::ZERO;
        }
        let multiplier = self
            .boosted_markets
            .get(&market.id)
            .copied()
            .unwrap_or(Decimal::ONE);
        fee * multiplier
    }
}

/// Trailing volume and reward points per subaccount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingStats {
    pub volume: Decimal,
    pub reward_points: Decimal,
}

pub type StatsBySubaccount = BTreeMap<SubaccountId, TradingStats>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketStatus, MarketType};
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            id: MarketId::derive(&["m"]),
            ticker: "INJ/USDT".to_string(),
            market_type: MarketType::Spot,
            base_denom: Some(Denom::from("inj")),
            quote_denom: Denom::from("usdt"),
            oracle: None,
            min_price_tick_size: dec!(0.01),
            min_quantity_tick_size: dec!(0.01),
            maker_fee_rate: dec!(0.001),
            taker_fee_rate: dec!(0.002),
            relayer_fee_share_rate: dec!(0.4),
            margin: None,
            perpetual: None,
            expiry: None,
            settlement_scale: None,
            status: MarketStatus::Active,
            mark_price_snapshot: None,
            last_trade_price: None,
            open_interest: Decimal::ZERO,
            volume: Decimal::ZERO,
            launched_at: Timestamp::from_secs(0),
        }
    }

    fn schedule() -> FeeDiscountSchedule {
        FeeDiscountSchedule {
            quote_denoms: vec![Denom::from("usdt")],
            tiers: vec![
                FeeDiscountTier {
                    min_volume: dec!(0),
                    maker_discount_rate: dec!(0),
                    taker_discount_rate: dec!(0),
                },
                FeeDiscountTier {
                    min_volume: dec!(1000),
                    maker_discount_rate: dec!(0.5),
                    taker_discount_rate: dec!(0.25),
                },
            ],
        }
    }

    #[test]
    fn discount_by_volume_tier() {
        let m = market();
        let s = schedule();
        assert_eq!(effective_fee_rate(&m, false, Some(&s), dec!(10)), dec!(0.002));
        assert_eq!(effective_fee_rate(&m, false, Some(&s), dec!(5000)), dec!(0.0015));
        assert_eq!(effective_fee_rate(&m, true, Some(&s), dec!(5000)), dec!(0.0005));
        assert_eq!(effective_fee_rate(&m, true, None, dec!(5000)), dec!(0.001));
    }

    #[test]
    fn rebates_untouched() {
        let mut m = market();
        m.maker_fee_rate = dec!(-0.0005);
        assert_eq!(effective_fee_rate(&m, true, Some(&schedule()), dec!(5000)), dec!(-0.0005));
    }

    #[test]
    fn relayer_split() {
        let split = split_fee(dec!(10), dec!(0.4), true);
        assert_eq!(split.relayer, dec!(4));
        assert_eq!(split.exchange, dec!(6));
        assert_eq!(split_fee(dec!(10), dec!(0.4), false).exchange, dec!(10));
        assert_eq!(split_fee(dec!(-1), dec!(0.4), true).exchange, dec!(-1));
    }

    #[test]
    fn campaign_points() {
        let m = market();
        let mut boosted = BTreeMap::new();
        boosted.insert(m.id, dec!(2));
        let c = TradingRewardCampaign {
            quote_denoms: vec![Denom::from("usdt")],
            boosted_markets: boosted,
            start: Timestamp::from_secs(100),
            duration: 100,
        };
        assert!(c.validate().is_ok());
        assert_eq!(c.points_for(&m, dec!(3), Timestamp::from_secs(150)), dec!(6));
        assert_eq!(c.points_for(&m, dec!(3), Timestamp::from_secs(200)), dec!(0));
        assert_eq!(c.points_for(&m, dec!(3), Timestamp::from_secs(50)), dec!(0));
    }

    #[test]
    fn unsorted_schedule_rejected() {
        let mut s = schedule();
        s.tiers.reverse();
        assert!(s.validate().is_err());
    }
}
