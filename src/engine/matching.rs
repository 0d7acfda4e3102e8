//! Immediate matching and the end-block batch auction.
//!
//! Every fill trades at the resting (maker) price. Immediate matching walks
//! the opposite side best-first for spot orders, market orders and forced
//! liquidations. Derivative limit orders only rest during the block; at end
//! block the batch pass pairs best bid with best ask while they cross, the
//! earlier-inserted order of each pair acting as maker.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{CancelReason, EventPayload};
use crate::fees::{effective_fee_rate, split_fee};
use crate::margin::notional_value;
use crate::market::{Market, MarketType};
use crate::oracle::PriceOracle;
use crate::order::{Fill, Order};
use crate::types::{Denom, MarketId, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Who sits on the taker side of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TakerRole {
    Trader,
    /// forced close: no taker fee, payout kept for distribution
    Liquidation,
}

#[derive(Debug, Clone)]
pub(super) struct FillOutcome {
    pub fill: Fill,
    /// taker payout withheld from the owner (liquidations only)
    pub retained_payout: Decimal,
}

/// Which side of a fill could not be settled.
#[derive(Debug)]
pub(super) enum FillFailure {
    Maker(EngineError),
    Taker(EngineError),
}

impl<O: PriceOracle> Engine<O> {
    // 2.3: walk the opposite side until the taker is done or stops crossing
    pub(super) fn match_immediate(
        &mut self,
        market: &Market,
        taker: &mut Order,
        role: TakerRole,
    ) -> Result<Vec<FillOutcome>, EngineError> {
        let mut outcomes = Vec::new();

        while !taker.is_filled() {
            let taker_capacity = self.fill_capacity(taker);
            if taker_capacity.is_zero() {
                break;
            }

            let maker = match self
                .ledger
                .books
                .get(&market.id)
                .and_then(|b| b.best_order(taker.side.opposite()))
            {
                Some(best) if taker.side.crosses(taker.price, best.price) => best.clone(),
                _ => break,
            };

            let maker_capacity = self.fill_capacity(&maker);
            if maker_capacity.is_zero() {
                self.cancel_order_internal(market.id, maker.hash, CancelReason::ReduceOnlyExcess)?;
                continue;
            }
            let quantity = taker_capacity.min(maker_capacity);

            let mut maker = maker;
            let mut working_taker = taker.clone();
            let result = self.attempt(|e| e.execute_fill(market.id, &mut maker, &mut working_taker, quantity, role));
            match result {
                Ok(outcome) => {
                    *taker = working_taker;
                    self.store_resting(maker)?;
                    outcomes.push(outcome);
                }
                Err(FillFailure::Maker(err)) => {
                    warn!(
                        market = %market.id,
                        order = %maker.hash,
                        error = %err,
                        "maker could not settle fill, order cancelled"
                    );
                    self.cancel_order_internal(market.id, maker.hash, CancelReason::FillFailed)?;
                }
                Err(FillFailure::Taker(err)) => return Err(err),
            }
        }

        Ok(outcomes)
    }

    // 2.4: end-block clearing of one derivative market
    pub(super) fn run_batch_auction(&mut self, market_id: MarketId) -> Result<Vec<Fill>, EngineError> {
        let mut fills = Vec::new();

        loop {
            let book = self
                .ledger
                .books
                .get(&market_id)
                .ok_or(EngineError::MarketNotFound(market_id))?;
            let (bid, ask) = match (book.best_order(Side::Buy), book.best_order(Side::Sell)) {
                (Some(bid), Some(ask)) if bid.price >= ask.price => (bid.clone(), ask.clone()),
                _ => break,
            };
            let (mut maker, mut taker) = if bid.sequence < ask.sequence {
                (bid, ask)
            } else {
                (ask, bid)
            };

            let maker_capacity = self.fill_capacity(&maker);
            if maker_capacity.is_zero() {
                self.cancel_order_internal(market_id, maker.hash, CancelReason::ReduceOnlyExcess)?;
                continue;
            }
            let taker_capacity = self.fill_capacity(&taker);
            if taker_capacity.is_zero() {
                self.cancel_order_internal(market_id, taker.hash, CancelReason::ReduceOnlyExcess)?;
                continue;
            }
            let quantity = maker_capacity.min(taker_capacity);

            let result = self.attempt(|e| e.execute_fill(market_id, &mut maker, &mut taker, quantity, TakerRole::Trader));
            match result {
                Ok(outcome) => {
                    self.store_resting(maker)?;
                    self.store_resting(taker)?;
                    fills.push(outcome.fill);
                }
                Err(FillFailure::Maker(err)) => {
                    warn!(market = %market_id, order = %maker.hash, error = %err, "batch maker cancelled");
                    self.cancel_order_internal(market_id, maker.hash, CancelReason::FillFailed)?;
                }
                Err(FillFailure::Taker(err)) => {
                    warn!(market = %market_id, order = %taker.hash, error = %err, "batch taker cancelled");
                    self.cancel_order_internal(market_id, taker.hash, CancelReason::FillFailed)?;
                }
            }
        }

        if !fills.is_empty() {
            debug!(market = %market_id, fills = fills.len(), "batch auction cleared");
        }
        self.enforce_reduce_only_after(&fills)?;
        Ok(fills)
    }

    /// How much of an order may fill right now. reduce-only orders stop at the position.
    pub(super) fn fill_capacity(&self, order: &Order) -> Decimal {
        if !order.reduce_only {
            return order.fillable;
        }
        self.ledger
            .positions
            .get(&(order.market_id, order.subaccount_id))
            .map(|p| p.closing_quantity(order.side, order.fillable))
            .unwrap_or_default()
    }

    /// Writes a matched order back into the book, or drops it once filled.
    pub(super) fn store_resting(&mut self, order: Order) -> Result<(), EngineError> {
        let book = self.book_mut(order.market_id)?;
        if order.is_filled() {
            book.remove(&order.hash);
        } else if let Some(slot) = book.get_mut(&order.hash) {
            *slot = order;
        }
        Ok(())
    }

    // 2.5: settle both legs of one fill at the maker's price
    pub(super) fn execute_fill(
        &mut self,
        market_id: MarketId,
        maker: &mut Order,
        taker: &mut Order,
        quantity: Decimal,
        role: TakerRole,
    ) -> Result<FillOutcome, FillFailure> {
        let market = self.market_ref(market_id).map_err(FillFailure::Taker)?.clone();
        let price = maker.price;
        let overflow = || FillFailure::Taker(EngineError::Overflow("fill notional"));
        let notional = notional_value(price, quantity).ok_or_else(overflow)?;

        let maker_rate = self.fee_rate_for(&market, maker.subaccount_id, true);
        let taker_rate = match role {
            TakerRole::Trader => self.fee_rate_for(&market, taker.subaccount_id, false),
            TakerRole::Liquidation => Decimal::ZERO,
        };
        let maker_fee = notional.checked_mul(maker_rate).ok_or_else(overflow)?;
        let taker_fee = notional.checked_mul(taker_rate).ok_or_else(overflow)?;

        // taker first so its fee is in the pool before any maker rebate
        let retained_payout = self
            .settle_leg(&market, taker, quantity, price, taker_fee, role == TakerRole::Trader)
            .map_err(FillFailure::Taker)?;
        self.settle_leg(&market, maker, quantity, price, maker_fee, true)
            .map_err(FillFailure::Maker)?;

        let fill = Fill {
            market_id,
            maker_order: maker.hash,
            maker_subaccount: maker.subaccount_id,
            taker_order: match role {
                TakerRole::Trader => Some(taker.hash),
                TakerRole::Liquidation => None,
            },
            taker_subaccount: taker.subaccount_id,
            taker_side: taker.side,
            price,
            quantity,
            maker_fee,
            taker_fee,
        };

        if let Ok(m) = self.market_mut(market_id) {
            m.record_trade(price.value(), quantity);
        }
        debug!(
            market = %market_id,
            price = %price,
            %quantity,
            maker = %maker.subaccount_id,
            taker = %taker.subaccount_id,
            "fill"
        );
        self.emit(EventPayload::Fill(fill.clone()));

        Ok(FillOutcome { fill, retained_payout })
    }

    fn fee_rate_for(&self, market: &Market, subaccount_id: SubaccountId, is_maker: bool) -> Decimal {
        let volume = self
            .ledger
            .stats
            .get(&subaccount_id)
            .map(|s| s.volume)
            .unwrap_or_default();
        effective_fee_rate(market, is_maker, self.ledger.fee_discounts.as_ref(), volume)
    }

    /// One side of a fill. returns the payout withheld when `settle_payout` is off.
    fn settle_leg(
        &mut self,
        market: &Market,
        order: &mut Order,
        quantity: Decimal,
        price: Price,
        fee: Decimal,
        settle_payout: bool,
    ) -> Result<Decimal, EngineError> {
        let cost = notional_value(price, quantity).ok_or(EngineError::Overflow("fill notional"))?;
        let escrow = order.take_fill(quantity);
        self.record_volume(market, order.subaccount_id, cost, fee);

        if market.market_type != MarketType::Spot {
            return self.settle_position_leg(market, order, escrow, quantity, price, fee, settle_payout);
        }

        let subaccount = order.subaccount_id;
        let base = market.base_denom()?.clone();
        let quote = &market.quote_denom;
        let charged = fee.max(Decimal::ZERO);

        match order.side {
            Side::Buy => {
                self.pay_from_escrow(subaccount, quote, escrow.total(), cost + charged)?;
                self.ledger.balances.credit(subaccount, &base, quantity);
            }
            Side::Sell => {
                self.ledger.balances.spend_locked(subaccount, &base, quantity)?;
                self.ledger.balances.credit(subaccount, quote, cost - charged);
            }
        }
        let rebate = self.route_fee(market, order.fee_recipient, fee);
        if rebate > Decimal::ZERO {
            self.ledger.balances.credit(subaccount, quote, rebate);
        }
        Ok(Decimal::ZERO)
    }

    /// Spends `amount` from an escrow slice, frees the rest of the slice, and
    /// takes any overshoot from free balance.
    pub(super) fn pay_from_escrow(
        &mut self,
        subaccount_id: SubaccountId,
        denom: &Denom,
        escrow: Decimal,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let from_escrow = amount.min(escrow);
        self.ledger.balances.spend_locked(subaccount_id, denom, from_escrow)?;
        self.ledger.balances.unlock(subaccount_id, denom, escrow - from_escrow);
        if amount > from_escrow {
            self.ledger.balances.settle(subaccount_id, denom, from_escrow - amount)?;
        }
        Ok(())
    }

    // 7.3: positive fees split relayer / pool. negative fees are paid out of the
    // pool, never more than it holds. returns the rebate owed to the payer
    pub(super) fn route_fee(&mut self, market: &Market, recipient: Option<SubaccountId>, fee: Decimal) -> Decimal {
        let quote = &market.quote_denom;
        if fee >= Decimal::ZERO {
            let split = split_fee(fee, market.relayer_fee_share_rate, recipient.is_some());
            if let Some(recipient) = recipient {
                if split.relayer > Decimal::ZERO {
                    self.ledger.balances.credit(recipient, quote, split.relayer);
                }
            }
            self.credit_fee_pool(quote, split.exchange);
            return Decimal::ZERO;
        }

        let pool = self.ledger.fee_pool.entry_or_default(quote.clone());
        let rebate = (-fee).min(*pool);
        *pool -= rebate;
        rebate
    }

    fn record_volume(&mut self, market: &Market, subaccount_id: SubaccountId, notional: Decimal, fee: Decimal) {
        let points = match &self.ledger.campaign {
            Some(campaign) => campaign.points_for(market, fee, self.block.time),
            None => Decimal::ZERO,
        };
        let stats = self.ledger.stats.entry_or_default(subaccount_id);
        stats.volume += notional;
        stats.reward_points += points;
    }
}
