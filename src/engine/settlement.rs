//! Market settlement: expiry, binary resolution and forced closure.
//!
//! Settling a market cancels every order, closes every position at the
//! settlement price and pays the owners out. Losses beyond a position's
//! margin are drawn from the market's insurance fund first; whatever the
//! fund cannot cover is taken pro rata from the winning payouts so the
//! market always closes flat.

use super::core::Engine;
use super::results::{EngineError, SettlementResult};
use crate::events::{CancelReason, EventPayload, MarketSettledEvent};
use crate::market::{MarketError, MarketStatus, MarketType, SettlementPrice};
use crate::oracle::PriceOracle;
use crate::types::{MarketId, SubaccountId};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl<O: PriceOracle> Engine<O> {
    // 9.1: close everything at `price` and move the market to `status`
    pub(super) fn settle_market(
        &mut self,
        market_id: MarketId,
        price: SettlementPrice,
        status: MarketStatus,
    ) -> Result<SettlementResult, EngineError> {
        self.cancel_market_orders(market_id, CancelReason::Settlement)?;
        let market = self.market_ref(market_id)?.clone();
        let quote = market.quote_denom.clone();
        let cumulative = market.cumulative_funding();

        let mut payouts: Vec<(SubaccountId, Decimal)> = Vec::new();
        for (subaccount_id, mut position) in self.ledger.positions_in(market_id) {
            position.settle_funding(cumulative);
            let close_price = match price {
                SettlementPrice::Price(p) => p,
                SettlementPrice::RefundAtEntry => position.entry_price,
            };
            let change = position.close_at(close_price);
            payouts.push((subaccount_id, change.payout()));
            self.ledger.positions.remove(&(market_id, subaccount_id));
        }

        let deficit: Decimal = payouts.iter().map(|(_, p)| (-*p).max(Decimal::ZERO)).sum();
        let fund_balance = self
            .ledger
            .insurance_funds
            .get(&market_id)
            .map(|f| f.balance)
            .unwrap_or_default();
        let insurance_draw = deficit.min(fund_balance);
        if insurance_draw > Decimal::ZERO {
            self.insurance_fund_mut(market_id)?.draw(insurance_draw)?;
        }

        let winnings: Decimal = payouts.iter().map(|(_, p)| (*p).max(Decimal::ZERO)).sum();
        let haircut = (deficit - insurance_draw).min(winnings);
        let cuts = haircut_shares(&payouts, haircut, winnings);
        for ((subaccount_id, payout), cut) in payouts.iter().zip(cuts) {
            if *payout > Decimal::ZERO {
                self.ledger.balances.credit(*subaccount_id, &quote, *payout - cut);
            }
        }
        if haircut > Decimal::ZERO {
            warn!(market = %market_id, %haircut, "insurance fund short, winners haircut");
        }

        let settlement_price = match price {
            SettlementPrice::Price(p) => Some(p),
            SettlementPrice::RefundAtEntry => None,
        };
        {
            let market = self.market_mut(market_id)?;
            market.open_interest = Decimal::ZERO;
            if let Some(expiry) = market.expiry.as_mut() {
                expiry.settlement_price = Some(price);
            }
        }
        self.pay_all_redemptions(market_id)?;
        self.change_status(market_id, status)?;

        info!(market = %market_id, price = ?settlement_price, positions = payouts.len(), "market settled");
        self.emit(EventPayload::MarketSettled(MarketSettledEvent {
            market_id,
            settlement_price,
            positions_closed: payouts.len(),
            insurance_draw,
            haircut,
        }));

        Ok(SettlementResult {
            market_id,
            status,
            settlement_price,
            positions_closed: payouts.len(),
            insurance_draw,
            haircut,
        })
    }

    // 9.2: dated markets reaching their timestamps
    pub(super) fn process_expiries(&mut self) -> Result<Vec<SettlementResult>, EngineError> {
        let now = self.block.time;
        let dated: Vec<MarketId> = self
            .ledger
            .markets
            .values()
            .filter(|m| m.expiry.is_some() && !m.status.is_settled() && m.status != MarketStatus::Unspecified)
            .map(|m| m.id)
            .collect();

        let mut settled = Vec::new();
        for market_id in dated {
            let market = self.market_ref(market_id)?.clone();
            let Some(expiry) = market.expiry else { continue };

            match market.market_type {
                MarketType::ExpiryFutures => {
                    if market.status != MarketStatus::Active || now < expiry.expiration_timestamp {
                        continue;
                    }
                    let Some(price) = self.oracle_price(&market) else {
                        warn!(market = %market_id, "expiry reached without oracle price, settlement deferred");
                        continue;
                    };
                    settled.push(self.settle_market(market_id, SettlementPrice::Price(price), MarketStatus::Expired)?);
                }
                MarketType::BinaryOptions => {
                    let settles_at = expiry.settlement_timestamp.unwrap_or(expiry.expiration_timestamp);
                    if now >= settles_at {
                        let Some(price) = self.binary_settlement_price(&market) else {
                            warn!(market = %market_id, "binary options market due without settlement price");
                            continue;
                        };
                        settled.push(self.settle_market(market_id, price, MarketStatus::Demolished)?);
                    } else if market.status == MarketStatus::Active && now >= expiry.expiration_timestamp {
                        // trading stops, positions wait for the settlement timestamp
                        self.cancel_market_orders(market_id, CancelReason::MarketExpired)?;
                        self.change_status(market_id, MarketStatus::Expired)?;
                    }
                }
                MarketType::Spot | MarketType::Perpetual => {}
            }
        }
        Ok(settled)
    }

    /// Admin-provided price first, else the oracle clamped into `[0, scale]`.
    fn binary_settlement_price(&self, market: &crate::market::Market) -> Option<SettlementPrice> {
        if let Some(price) = market.expiry.and_then(|e| e.settlement_price) {
            return Some(price);
        }
        let scale = market.settlement_scale?;
        let oracle = self.oracle.mark_price(market)?;
        Some(SettlementPrice::Price(oracle.max(Decimal::ZERO).min(scale)))
    }

    // 9.3: governance closure of a market of any type
    pub(super) fn force_settle(
        &mut self,
        market_id: MarketId,
        price: Option<Decimal>,
    ) -> Result<SettlementResult, EngineError> {
        let market = self.market_ref(market_id)?.clone();
        if !market.status.can_transition_to(MarketStatus::Demolished) {
            return Err(MarketError::InvalidTransition {
                market_id,
                from: market.status,
                to: MarketStatus::Demolished,
            }
            .into());
        }

        let price = match market.market_type {
            MarketType::Spot => {
                self.cancel_market_orders(market_id, CancelReason::Settlement)?;
                self.change_status(market_id, MarketStatus::Demolished)?;
                return Ok(SettlementResult {
                    market_id,
                    status: MarketStatus::Demolished,
                    settlement_price: None,
                    positions_closed: 0,
                    insurance_draw: Decimal::ZERO,
                    haircut: Decimal::ZERO,
                });
            }
            MarketType::Perpetual | MarketType::ExpiryFutures => {
                let price = price
                    .or_else(|| self.oracle_price(&market))
                    .ok_or(EngineError::MissingMarkPrice(market_id))?;
                SettlementPrice::Price(price)
            }
            MarketType::BinaryOptions => match price {
                Some(p) => {
                    let scale = market.settlement_scale.unwrap_or(Decimal::ONE);
                    if p < Decimal::ZERO || p > scale {
                        return Err(MarketError::PriceOutOfRange { price: p, max: scale }.into());
                    }
                    SettlementPrice::Price(p)
                }
                None => SettlementPrice::RefundAtEntry,
            },
        };
        self.settle_market(market_id, price, MarketStatus::Demolished)
    }
}

/// Pro-rata cut per payout. Losers get zero; the last winner absorbs rounding
/// so the cuts add up to `haircut` exactly.
fn haircut_shares(payouts: &[(SubaccountId, Decimal)], haircut: Decimal, winnings: Decimal) -> Vec<Decimal> {
    let mut cuts = vec![Decimal::ZERO; payouts.len()];
    if haircut <= Decimal::ZERO || winnings <= Decimal::ZERO {
        return cuts;
    }
    let last_winner = payouts.iter().rposition(|(_, p)| *p > Decimal::ZERO);
    let mut assigned = Decimal::ZERO;
    for (i, (_, payout)) in payouts.iter().enumerate() {
        if *payout <= Decimal::ZERO {
            continue;
        }
        cuts[i] = if Some(i) == last_winner {
            haircut - assigned
        } else {
            (haircut * *payout / winnings).min(*payout)
        };
        assigned += cuts[i];
    }
    cuts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn haircut_sums_exactly() {
        let payouts = vec![
            (SubaccountId(1), dec!(100)),
            (SubaccountId(2), dec!(-30)),
            (SubaccountId(3), dec!(200)),
            (SubaccountId(4), dec!(100)),
        ];
        let cuts = haircut_shares(&payouts, dec!(10), dec!(400));
        assert_eq!(cuts[1], dec!(0));
        assert_eq!(cuts.iter().copied().sum::<Decimal>(), dec!(10));
        assert_eq!(cuts[0], dec!(2.5));
        assert_eq!(cuts[2], dec!(5));
    }

    #[test]
    fn thirds_leave_no_dust() {
        let payouts = vec![
            (SubaccountId(1), dec!(1)),
            (SubaccountId(2), dec!(1)),
            (SubaccountId(3), dec!(1)),
        ];
        let cuts = haircut_shares(&payouts, dec!(1), dec!(3));
        assert_eq!(cuts.iter().copied().sum::<Decimal>(), dec!(1));
    }

    #[test]
    fn no_haircut_no_cuts() {
        let payouts = vec![(SubaccountId(1), dec!(5))];
        assert_eq!(haircut_shares(&payouts, dec!(0), dec!(5)), vec![dec!(0)]);
    }
}
