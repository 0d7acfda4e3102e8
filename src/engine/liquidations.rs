//! Liquidation detection and execution.

use super::core::Engine;
use super::matching::TakerRole;
use super::results::{BlockReport, EngineError, LiquidationResult, SkippedLiquidation};
use crate::events::{CancelReason, EventPayload, InvariantViolationEvent, LiquidationEvent};
use crate::liquidation::{cover_deficit, is_liquidatable, split_positive_payout};
use crate::market::MarketStatus;
use crate::oracle::PriceOracle;
use crate::order::{Fill, Order, OrderType};
use crate::types::{MarketId, Price, SubaccountId};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

impl<O: PriceOracle> Engine<O> {
    /// Liquidate one position on behalf of `liquidator`, who earns a share of any surplus.
    pub fn liquidate_position(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        liquidator: Option<SubaccountId>,
    ) -> Result<LiquidationResult, EngineError> {
        self.transact(|e| {
            let market = e.market_ref(market_id)?.clone();
            market.ensure_accepts_orders()?;
            let ratios = market.margin_ratios()?;
            let mark = e
                .live_mark_price(&market)
                .ok_or(EngineError::MissingMarkPrice(market_id))?;
            let position = e
                .ledger
                .positions
                .get(&(market_id, subaccount_id))
                .filter(|p| !p.is_empty())
                .ok_or(EngineError::PositionNotFound {
                    market_id,
                    subaccount_id,
                })?;
            if !is_liquidatable(position, mark, ratios.maintenance, market.cumulative_funding()) {
                return Err(EngineError::NotLiquidatable {
                    market_id,
                    subaccount_id,
                });
            }
            e.execute_liquidation(market_id, subaccount_id, mark, liquidator)
        })
    }

    // 6.3: end-block sweep over leveraged markets, positions in insertion order
    pub(super) fn run_liquidation_sweep(&mut self, report: &mut BlockReport) -> Result<(), EngineError> {
        let markets: Vec<MarketId> = self
            .ledger
            .markets
            .values()
            .filter(|m| m.market_type.is_leveraged() && m.is_active())
            .map(|m| m.id)
            .collect();

        for market_id in markets {
            let market = self.market_ref(market_id)?.clone();
            let Some(mark) = self.live_mark_price(&market) else {
                warn!(market = %market_id, "no mark price, liquidation sweep skipped");
                continue;
            };
            let maintenance = market.margin_ratios()?.maintenance;

            for (subaccount_id, _) in self.ledger.positions_in(market_id) {
                // earlier liquidations in this sweep may have traded against it
                let Some(position) = self.ledger.positions.get(&(market_id, subaccount_id)) else {
                    continue;
                };
                let cumulative = self.market_ref(market_id)?.cumulative_funding();
                if !is_liquidatable(position, mark, maintenance, cumulative) {
                    continue;
                }

                match self.attempt(|e| e.execute_liquidation(market_id, subaccount_id, mark, None)) {
                    Ok(result) => report.liquidations.push(result),
                    Err(err @ EngineError::InsuranceFundInsufficient { .. }) => {
                        error!(market = %market_id, subaccount = %subaccount_id, error = %err, "insurance fund exhausted, market paused");
                        let violation = InvariantViolationEvent {
                            market_id,
                            subaccount_id: Some(subaccount_id),
                            description: err.to_string(),
                        };
                        self.emit(EventPayload::InvariantViolation(violation.clone()));
                        report.violations.push(violation);
                        self.change_status(market_id, MarketStatus::Paused)?;
                        break;
                    }
                    Err(err) => {
                        warn!(market = %market_id, subaccount = %subaccount_id, error = %err, "liquidation skipped");
                        report.skipped_liquidations.push(SkippedLiquidation {
                            market_id,
                            subaccount_id,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // 6.4: cancel the owner's orders, close the position against the book at no
    // worse than mark, then route the payout or cover the deficit
    fn execute_liquidation(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        mark_price: Decimal,
        liquidator: Option<SubaccountId>,
    ) -> Result<LiquidationResult, EngineError> {
        self.cancel_orders_of(market_id, subaccount_id, CancelReason::Liquidation)?;
        self.settle_position_funding(market_id, subaccount_id)?;

        let market = self.market_ref(market_id)?.clone();
        let position = self
            .ledger
            .positions
            .get(&(market_id, subaccount_id))
            .filter(|p| !p.is_empty())
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                market_id,
                subaccount_id,
            })?;
        let side = position.closing_side().ok_or(EngineError::PositionNotFound {
            market_id,
            subaccount_id,
        })?;
        let worst_price = Price::new(mark_price).ok_or(EngineError::MissingMarkPrice(market_id))?;

        let hash = self.next_order_hash(subaccount_id);
        let sequence = self.next_order_sequence();
        let mut order = Order {
            hash,
            market_id,
            subaccount_id,
            side,
            order_type: OrderType::Market,
            price: worst_price,
            quantity: position.quantity,
            fillable: position.quantity,
            margin: Decimal::ZERO,
            fee_reserve: Decimal::ZERO,
            reduce_only: true,
            trigger: None,
            fee_recipient: None,
            sequence,
            placed_at: self.block.time,
        };

        let outcomes = self.match_immediate(&market, &mut order, TakerRole::Liquidation)?;
        if !order.is_filled() {
            return Err(EngineError::InsufficientLiquidity {
                market_id,
                unfilled: order.fillable,
            });
        }
        let payout: Decimal = outcomes.iter().map(|o| o.retained_payout).sum();
        let fills: Vec<Fill> = outcomes.into_iter().map(|o| o.fill).collect();
        self.enforce_reduce_only_after(&fills)?;

        let quote = market.quote_denom.clone();
        let mut liquidator_reward = Decimal::ZERO;
        let mut owner_contribution = Decimal::ZERO;
        let insurance_delta;

        if payout >= Decimal::ZERO {
            let split = split_positive_payout(payout, liquidator.is_some(), &self.config.params.liquidation);
            if let Some(liquidator) = liquidator {
                self.ledger.balances.credit(liquidator, &quote, split.liquidator);
                liquidator_reward = split.liquidator;
            }
            self.insurance_fund_mut(market_id)?.credit(split.insurance_fund);
            insurance_delta = split.insurance_fund;
        } else {
            let deficit = -payout;
            let available = self.ledger.balances.get(subaccount_id, &quote).available;
            let cover = cover_deficit(deficit, available);
            if cover.from_owner > Decimal::ZERO {
                self.ledger.balances.debit(subaccount_id, &quote, cover.from_owner)?;
                owner_contribution = cover.from_owner;
            }
            let fund = self.insurance_fund_mut(market_id)?;
            if !fund.can_cover(cover.from_insurance) {
                return Err(EngineError::InsuranceFundInsufficient {
                    market_id,
                    needed: cover.from_insurance,
                    available: fund.balance,
                });
            }
            fund.draw(cover.from_insurance)?;
            insurance_delta = -cover.from_insurance;
        }

        let filled: Decimal = fills.iter().map(|f| f.quantity).sum();
        let notional: Decimal = fills.iter().map(|f| f.notional()).sum();
        let average_price = if filled.is_zero() { Decimal::ZERO } else { notional / filled };

        info!(
            market = %market_id,
            subaccount = %subaccount_id,
            quantity = %position.quantity,
            %mark_price,
            %payout,
            "position liquidated"
        );
        self.emit(EventPayload::Liquidation(LiquidationEvent {
            market_id,
            subaccount_id,
            liquidator,
            quantity: position.quantity,
            mark_price,
            payout,
            liquidator_reward,
            insurance_delta,
        }));

        Ok(LiquidationResult {
            market_id,
            subaccount_id,
            liquidator,
            was_long: position.is_long,
            quantity: position.quantity,
            mark_price,
            average_price,
            payout,
            liquidator_reward,
            insurance_delta,
            owner_contribution,
        })
    }
}
