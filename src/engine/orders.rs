//! Order placement, escrow and cancellation.

use super::core::Engine;
use super::matching::TakerRole;
use super::results::{EngineError, OrderOutcome, OrderStatus};
use crate::events::{CancelReason, EventPayload, OrderCancelledEvent, OrderPlacedEvent};
use crate::margin::{binary_options_margin, fee_reserve, notional_value, required_margin};
use crate::market::{Market, MarketError, MarketType};
use crate::oracle::PriceOracle;
use crate::order::{Order, OrderType, Trigger, TriggerKind};
use crate::types::{MarketId, OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An order as submitted by a trader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    /// limit price, or worst acceptable price for market orders
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub reduce_only: bool,
    pub trigger: Option<(TriggerKind, Decimal)>,
    /// margin to escrow; the exact requirement when unset
    pub margin: Option<Decimal>,
    pub fee_recipient: Option<SubaccountId>,
}

impl OrderRequest {
    pub fn limit(market_id: MarketId, subaccount_id: SubaccountId, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            market_id,
            subaccount_id,
            side,
            price,
            quantity,
            order_type: OrderType::Limit,
            reduce_only: false,
            trigger: None,
            margin: None,
            fee_recipient: None,
        }
    }

    pub fn market(
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
        worst_price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Market,
            ..Self::limit(market_id, subaccount_id, side, worst_price, quantity)
        }
    }

    pub fn post_only(mut self) -> Self {
        self.order_type = OrderType::PostOnly;
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_margin(mut self, margin: Decimal) -> Self {
        self.margin = Some(margin);
        self
    }

    pub fn with_trigger(mut self, kind: TriggerKind, price: Decimal) -> Self {
        self.trigger = Some((kind, price));
        self
    }

    pub fn with_fee_recipient(mut self, recipient: SubaccountId) -> Self {
        self.fee_recipient = Some(recipient);
        self
    }
}

impl<O: PriceOracle> Engine<O> {
    /// Place an order. Everything it does commits together or not at all.
    pub fn place_order(&mut self, request: OrderRequest) -> Result<OrderOutcome, EngineError> {
        self.transact(|e| {
            let hash = e.next_order_hash(request.subaccount_id);
            e.submit_order(request, hash)
        })
    }

    /// Cancel a resting or conditional order owned by `subaccount_id`.
    pub fn cancel_order(
        &mut self,
        subaccount_id: SubaccountId,
        market_id: MarketId,
        hash: OrderHash,
    ) -> Result<(), EngineError> {
        self.transact(|e| {
            let owner = e
                .order(market_id, &hash)
                .map(|o| o.subaccount_id)
                .ok_or(EngineError::OrderNotFound(hash))?;
            if owner != subaccount_id {
                return Err(EngineError::OrderNotFound(hash));
            }
            e.cancel_order_internal(market_id, hash, CancelReason::UserRequested)?;
            Ok(())
        })
    }

    pub fn cancel_all_orders(&mut self, subaccount_id: SubaccountId, market_id: MarketId) -> Result<usize, EngineError> {
        self.transact(|e| e.cancel_orders_of(market_id, subaccount_id, CancelReason::UserRequested))
    }

    // 2.2: validate, escrow, then rest, match or park the order
    pub(super) fn submit_order(&mut self, request: OrderRequest, hash: OrderHash) -> Result<OrderOutcome, EngineError> {
        let market = self.market_ref(request.market_id)?.clone();
        market.ensure_accepts_orders()?;

        let price = market.validate_price(request.price)?;
        let mut quantity = market.validate_quantity(request.quantity)?;
        let trigger = match request.trigger {
            Some((kind, trigger_price)) => Some(Trigger {
                kind,
                price: market.validate_price(trigger_price)?,
            }),
            None => None,
        };

        if market.market_type == MarketType::Spot {
            if request.reduce_only {
                return Err(EngineError::UnsupportedOrder("reduce-only on a spot market".to_string()));
            }
            if trigger.is_some() {
                return Err(EngineError::UnsupportedOrder("conditional order on a spot market".to_string()));
            }
        }
        if trigger.is_some() && request.order_type == OrderType::PostOnly {
            return Err(EngineError::UnsupportedOrder("conditional post-only order".to_string()));
        }

        if request.order_type == OrderType::PostOnly {
            let book = self
                .ledger
                .books
                .get(&market.id)
                .ok_or(EngineError::MarketNotFound(market.id))?;
            if book.would_cross(request.side, price) {
                return Err(EngineError::PostOnlyWouldCross {
                    market_id: market.id,
                    price: price.value(),
                });
            }
        }

        if request.reduce_only {
            quantity = self.reduce_only_quantity(&market, request.subaccount_id, request.side, quantity)?;
        }

        let sequence = self.next_order_sequence();
        let mut order = Order {
            hash,
            market_id: market.id,
            subaccount_id: request.subaccount_id,
            side: request.side,
            order_type: request.order_type,
            price,
            quantity,
            fillable: quantity,
            margin: Decimal::ZERO,
            fee_reserve: Decimal::ZERO,
            reduce_only: request.reduce_only,
            trigger,
            fee_recipient: request.fee_recipient,
            sequence,
            placed_at: self.block.time,
        };
        self.escrow_order(&market, &mut order, request.margin)?;

        self.emit(EventPayload::OrderPlaced(OrderPlacedEvent {
            market_id: market.id,
            order_hash: hash,
            subaccount_id: order.subaccount_id,
            side: order.side,
            order_type: order.order_type,
            price: price.value(),
            quantity,
            margin: order.margin,
            reduce_only: order.reduce_only,
            conditional: trigger.is_some(),
        }));
        debug!(
            market = %market.id,
            order = %hash,
            side = ?order.side,
            price = %price,
            %quantity,
            "order accepted"
        );

        if trigger.is_some() {
            self.ledger
                .conditional
                .get_mut(&market.id)
                .ok_or(EngineError::MarketNotFound(market.id))?
                .insert(order);
            return Ok(OrderOutcome {
                order_hash: hash,
                status: OrderStatus::Conditional,
                quantity,
                filled_quantity: Decimal::ZERO,
                average_price: None,
                fills: Vec::new(),
            });
        }

        // derivative limit orders wait for the end-block batch
        let matches_now = market.market_type == MarketType::Spot || order.order_type == OrderType::Market;
        let fills = if matches_now {
            let outcomes = self.match_immediate(&market, &mut order, TakerRole::Trader)?;
            outcomes.into_iter().map(|o| o.fill).collect()
        } else {
            Vec::new()
        };
        self.enforce_reduce_only_after(&fills)?;

        let filled_quantity = quantity - order.fillable;
        let status = if order.is_filled() {
            OrderStatus::Filled
        } else if order.order_type == OrderType::Market {
            // the unfilled remainder is dropped, its escrow released
            self.release_escrow(&market, &order)?;
            self.emit(EventPayload::OrderCancelled(OrderCancelledEvent {
                market_id: market.id,
                order_hash: hash,
                subaccount_id: order.subaccount_id,
                reason: CancelReason::Unfilled,
            }));
            OrderStatus::PartiallyFilled
        } else {
            self.book_mut(market.id)?.insert(order);
            OrderStatus::Resting
        };

        Ok(OrderOutcome {
            order_hash: hash,
            status,
            quantity,
            filled_quantity,
            average_price: average_price(&fills),
            fills,
        })
    }

    // 3.3: margin needed by a new order at the current mark price
    pub(super) fn required_order_margin(
        &self,
        market: &Market,
        side: Side,
        price: Price,
        quantity: Decimal,
    ) -> Result<Decimal, EngineError> {
        match market.market_type {
            MarketType::Spot => Ok(Decimal::ZERO),
            MarketType::BinaryOptions => {
                let scale = market
                    .settlement_scale
                    .ok_or_else(|| MarketError::InvalidParams("binary options market without scale".to_string()))?;
                binary_options_margin(side, price, quantity, scale).ok_or(EngineError::Overflow("order margin"))
            }
            MarketType::Perpetual | MarketType::ExpiryFutures => {
                let mark = self
                    .live_mark_price(market)
                    .ok_or(EngineError::MissingMarkPrice(market.id))?;
                let ratios = market.margin_ratios()?;
                required_margin(side, price, quantity, mark, ratios.initial).ok_or(EngineError::Overflow("order margin"))
            }
        }
    }

    // 3.4: lock what the order may need. spot sells lock base, everything else quote
    pub(super) fn escrow_order(
        &mut self,
        market: &Market,
        order: &mut Order,
        margin: Option<Decimal>,
    ) -> Result<(), EngineError> {
        let fee_rate = market.taker_fee_rate.max(market.maker_fee_rate);
        let subaccount = order.subaccount_id;

        if market.market_type == MarketType::Spot {
            match order.side {
                Side::Buy => {
                    order.margin = notional_value(order.price, order.fillable).ok_or(EngineError::Overflow("order notional"))?;
                    order.fee_reserve = fee_reserve(order.price, order.fillable, fee_rate).ok_or(EngineError::Overflow("fee reserve"))?;
                    let escrow = checked_escrow(order)?;
                    self.ledger.balances.lock(subaccount, &market.quote_denom, escrow)?;
                }
                Side::Sell => {
                    // fees come out of the quote proceeds
                    let base = market.base_denom()?.clone();
                    self.ledger.balances.lock(subaccount, &base, order.fillable)?;
                }
            }
            return Ok(());
        }

        let required = if order.reduce_only {
            Decimal::ZERO
        } else {
            self.required_order_margin(market, order.side, order.price, order.fillable)?
        };
        order.margin = match margin {
            _ if order.reduce_only => Decimal::ZERO,
            Some(provided) if provided < required => {
                return Err(EngineError::InsufficientMargin { required, provided });
            }
            Some(provided) => provided,
            None => required,
        };
        order.fee_reserve = fee_reserve(order.price, order.fillable, fee_rate).ok_or(EngineError::Overflow("fee reserve"))?;
        let escrow = checked_escrow(order)?;
        self.ledger.balances.lock(subaccount, &market.quote_denom, escrow)?;
        Ok(())
    }

    pub(super) fn release_escrow(&mut self, market: &Market, order: &Order) -> Result<(), EngineError> {
        if market.market_type == MarketType::Spot && order.side == Side::Sell {
            let base = market.base_denom()?.clone();
            self.ledger.balances.unlock(order.subaccount_id, &base, order.fillable);
        } else {
            self.ledger
                .balances
                .unlock(order.subaccount_id, &market.quote_denom, order.escrow().total());
        }
        Ok(())
    }

    // 3.5: reduce-only orders are capped to what the position still leaves open
    fn reduce_only_quantity(
        &self,
        market: &Market,
        subaccount_id: SubaccountId,
        side: Side,
        quantity: Decimal,
    ) -> Result<Decimal, EngineError> {
        let position = self
            .ledger
            .positions
            .get(&(market.id, subaccount_id))
            .filter(|p| !p.is_empty())
            .ok_or(EngineError::ReduceOnlyWithoutPosition(market.id))?;
        if position.closing_side() != Some(side) {
            return Err(EngineError::ReduceOnlyWithoutPosition(market.id));
        }

        let resting: Decimal = self
            .ledger
            .books
            .get(&market.id)
            .map(|book| {
                book.orders_by_direction(side)
                    .filter(|o| o.subaccount_id == subaccount_id && o.reduce_only)
                    .map(|o| o.fillable)
                    .sum()
            })
            .unwrap_or_default();

        let available = position.quantity - resting;
        if available <= Decimal::ZERO {
            return Err(EngineError::ReduceOnlyExceedsPosition {
                requested: quantity,
                available: Decimal::ZERO,
            });
        }
        Ok(quantity.min(available))
    }

    /// Removes an order from the book or the conditional set and frees its escrow.
    pub(super) fn cancel_order_internal(
        &mut self,
        market_id: MarketId,
        hash: OrderHash,
        reason: CancelReason,
    ) -> Result<Order, EngineError> {
        let from_book = self.ledger.books.get_mut(&market_id).and_then(|b| b.remove(&hash));
        let order = match from_book {
            Some(order) => order,
            None => self
                .ledger
                .conditional
                .get_mut(&market_id)
                .and_then(|c| c.remove(&hash))
                .ok_or(EngineError::OrderNotFound(hash))?,
        };
        let market = self.market_ref(market_id)?.clone();
        self.release_escrow(&market, &order)?;
        self.emit(EventPayload::OrderCancelled(OrderCancelledEvent {
            market_id,
            order_hash: hash,
            subaccount_id: order.subaccount_id,
            reason,
        }));
        debug!(market = %market_id, order = %hash, ?reason, "order cancelled");
        Ok(order)
    }

    /// Cancels every order `subaccount_id` has in the market, conditional ones included.
    pub(super) fn cancel_orders_of(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        reason: CancelReason,
    ) -> Result<usize, EngineError> {
        let mut hashes = self
            .ledger
            .books
            .get(&market_id)
            .map(|b| b.orders_of(subaccount_id))
            .unwrap_or_default();
        if let Some(conditional) = self.ledger.conditional.get(&market_id) {
            hashes.extend(conditional.orders_of(subaccount_id));
        }
        for hash in &hashes {
            self.cancel_order_internal(market_id, *hash, reason)?;
        }
        Ok(hashes.len())
    }

    /// Cancels everything resting in a market, oldest first.
    pub(super) fn cancel_market_orders(&mut self, market_id: MarketId, reason: CancelReason) -> Result<(), EngineError> {
        let mut hashes: Vec<OrderHash> = self
            .ledger
            .books
            .get(&market_id)
            .map(|b| b.all_orders().iter().map(|o| o.hash).collect())
            .unwrap_or_default();
        if let Some(conditional) = self.ledger.conditional.get(&market_id) {
            hashes.extend(conditional.hashes());
        }
        for hash in hashes {
            self.cancel_order_internal(market_id, hash, reason)?;
        }
        Ok(())
    }
}

fn average_price(fills: &[crate::order::Fill]) -> Option<Decimal> {
    let quantity: Decimal = fills.iter().map(|f| f.quantity).sum();
    if quantity.is_zero() {
        return None;
    }
    let notional: Decimal = fills.iter().map(|f| f.notional()).sum();
    Some(notional / quantity)
}

fn checked_escrow(order: &Order) -> Result<Decimal, EngineError> {
    order
        .margin
        .checked_add(order.fee_reserve)
        .ok_or(EngineError::Overflow("order escrow"))
}
