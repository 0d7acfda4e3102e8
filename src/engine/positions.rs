//! Position ledger: derivative fill legs, reduce-only upkeep and margin top-ups.

use super::core::Engine;
use super::results::EngineError;
use crate::account::AccountError;
use crate::events::{CancelReason, EventPayload, PositionMarginEvent, PositionUpdatedEvent};
use crate::margin::pro_rata;
use crate::market::Market;
use crate::oracle::PriceOracle;
use crate::order::{Escrow, Fill, Order};
use crate::position::Position;
use crate::types::{MarketId, OrderHash, Price, SubaccountId};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

impl<O: PriceOracle> Engine<O> {
    // 4.3: one derivative leg. margin backing the closed part goes back to free
    // balance; the opened part moves from escrow onto the position
    #[allow(clippy::too_many_arguments)]
    pub(super) fn settle_position_leg(
        &mut self,
        market: &Market,
        order: &Order,
        escrow: Escrow,
        quantity: Decimal,
        price: Price,
        fee: Decimal,
        settle_payout: bool,
    ) -> Result<Decimal, EngineError> {
        let subaccount_id = order.subaccount_id;
        let key = (market.id, subaccount_id);
        let cumulative = market.cumulative_funding();

        let mut position = match self.ledger.positions.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let sequence = self.next_position_sequence();
                Position::empty(sequence, cumulative, self.block.time)
            }
        };
        position.settle_funding(cumulative);
        let long_before = long_quantity(&position);

        let closed = position.closing_quantity(order.side, quantity);
        let closing_margin = pro_rata(escrow.margin, closed, quantity);
        let opening_margin = escrow.margin - closing_margin;
        let change = position.apply_fill(order.side, quantity, price.value(), opening_margin, cumulative);

        let quote = &market.quote_denom;
        self.pay_from_escrow(subaccount_id, quote, escrow.total(), opening_margin + fee.max(Decimal::ZERO))?;
        let rebate = self.route_fee(market, order.fee_recipient, fee);

        let payout = change.payout() + rebate;
        let retained = if settle_payout {
            self.ledger.balances.settle(subaccount_id, quote, payout)?;
            Decimal::ZERO
        } else {
            payout
        };

        let long_delta = long_quantity(&position) - long_before;
        self.market_mut(market.id)?.open_interest += long_delta;

        self.emit(EventPayload::PositionUpdated(PositionUpdatedEvent {
            market_id: market.id,
            subaccount_id,
            is_long: position.is_long,
            quantity: position.quantity,
            entry_price: position.entry_price,
            margin: position.margin,
            realized_pnl: change.realized_pnl,
        }));
        if position.is_empty() {
            self.ledger.positions.remove(&key);
        } else {
            self.ledger.positions.insert(key, position);
        }

        Ok(retained)
    }

    /// Re-checks reduce-only orders of everyone who just traded.
    pub(super) fn enforce_reduce_only_after(&mut self, fills: &[Fill]) -> Result<(), EngineError> {
        let touched: BTreeSet<(MarketId, SubaccountId)> = fills
            .iter()
            .flat_map(|f| [(f.market_id, f.maker_subaccount), (f.market_id, f.taker_subaccount)])
            .collect();
        for (market_id, subaccount_id) in touched {
            self.enforce_reduce_only(market_id, subaccount_id)?;
        }
        Ok(())
    }

    // 4.4: resting reduce-only orders may never close more than the position holds.
    // wrong-side ones go first, then the newest until the rest fit
    pub(super) fn enforce_reduce_only(&mut self, market_id: MarketId, subaccount_id: SubaccountId) -> Result<(), EngineError> {
        let position = self.ledger.positions.get(&(market_id, subaccount_id)).cloned();
        let orders: Vec<(OrderHash, bool, Decimal)> = match self.ledger.books.get(&market_id) {
            Some(book) => book
                .all_orders()
                .into_iter()
                .filter(|o| o.subaccount_id == subaccount_id && o.reduce_only)
                .map(|o| {
                    let closes = position
                        .as_ref()
                        .map_or(false, |p| p.closing_side() == Some(o.side));
                    (o.hash, closes, o.fillable)
                })
                .collect(),
            None => return Ok(()),
        };

        let mut kept = Vec::new();
        for (hash, closes, fillable) in orders {
            if closes {
                kept.push((hash, fillable));
            } else {
                self.cancel_order_internal(market_id, hash, CancelReason::ReduceOnlyExcess)?;
            }
        }

        let limit = position.map(|p| p.quantity).unwrap_or_default();
        let mut total: Decimal = kept.iter().map(|(_, q)| *q).sum();
        while total > limit {
            let Some((hash, fillable)) = kept.pop() else { break };
            self.cancel_order_internal(market_id, hash, CancelReason::ReduceOnlyExcess)?;
            total -= fillable;
        }
        Ok(())
    }

    /// Move free quote balance from `source` onto an open position.
    ///
    /// Pending funding is realized first. A top-up that still leaves the
    /// margin below zero is rejected whole; the position stays for the sweep.
    pub fn increase_position_margin(
        &mut self,
        source: SubaccountId,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount).into());
        }
        self.transact(|e| {
            let market = e.market_ref(market_id)?.clone();
            market.ensure_accepts_orders()?;
            let key = (market_id, subaccount_id);
            let mut position = e
                .ledger
                .positions
                .get(&key)
                .filter(|p| !p.is_empty())
                .cloned()
                .ok_or(EngineError::PositionNotFound {
                    market_id,
                    subaccount_id,
                })?;

            e.ledger.balances.debit(source, &market.quote_denom, amount)?;
            position.settle_funding(market.cumulative_funding());
            position.margin += amount;
            if position.margin < Decimal::ZERO {
                return Err(EngineError::InsufficientMargin {
                    required: amount - position.margin,
                    provided: amount,
                });
            }

            debug!(market = %market_id, subaccount = %subaccount_id, %amount, margin = %position.margin, "position margin increased");
            e.emit(EventPayload::PositionMarginIncreased(PositionMarginEvent {
                market_id,
                subaccount_id,
                source,
                amount,
                margin: position.margin,
            }));
            e.ledger.positions.insert(key, position);
            Ok(())
        })
    }

    /// Realizes pending funding on one position, if it exists.
    pub(super) fn settle_position_funding(&mut self, market_id: MarketId, subaccount_id: SubaccountId) -> Result<(), EngineError> {
        let cumulative = self.market_ref(market_id)?.cumulative_funding();
        if let Some(position) = self.ledger.positions.get_mut(&(market_id, subaccount_id)) {
            position.settle_funding(cumulative);
        }
        Ok(())
    }
}

fn long_quantity(position: &Position) -> Decimal {
    if position.is_long {
        position.quantity
    } else {
        Decimal::ZERO
    }
}
