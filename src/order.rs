//! Orders and the per-market order book.
//!
//! Both sides are kept best-first in a `BTreeMap`: asks by ascending price,
//! bids by descending price, then insertion sequence on both. Iterating a
//! side from the front therefore always yields price-time priority.

use crate::margin::pro_rata;
use crate::types::{MarketId, OrderHash, Price, Side, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// rests if not (fully) marketable
    Limit,
    /// fills what it can against resting liquidity, remainder discarded
    Market,
    /// rejected if it would cross on arrival
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Stop,
    Take,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub price: Price,
}

impl Trigger {
    /// stop-buy / take-sell fire on a rising mark, stop-sell / take-buy on a falling one
    pub fn is_triggered(&self, side: Side, mark_price: Decimal) -> bool {
        let trigger = self.price.value();
        match (self.kind, side) {
            (TriggerKind::Stop, Side::Buy) | (TriggerKind::Take, Side::Sell) => mark_price >= trigger,
            (TriggerKind::Stop, Side::Sell) | (TriggerKind::Take, Side::Buy) => mark_price <= trigger,
        }
    }
}

/// Funds an order still holds for its unfilled quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Escrow {
    pub margin: Decimal,
    pub fee_reserve: Decimal,
}

impl Escrow {
    pub fn total(&self) -> Decimal {
        self.margin + self.fee_reserve
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub hash: OrderHash,
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub order_type: OrderType,
    /// limit price, or worst acceptable price for market orders
    pub price: Price,
    pub quantity: Decimal,
    pub fillable: Decimal,
    /// escrow for the fillable quantity: margin on derivatives, locked quote
    /// notional on spot buys, zero on spot sells and reduce-only orders
    pub margin: Decimal,
    /// worst-case taker fee still reserved for the fillable quantity
    pub fee_reserve: Decimal,
    pub reduce_only: bool,
    pub trigger: Option<Trigger>,
    pub fee_recipient: Option<SubaccountId>,
    pub sequence: u64,
    pub placed_at: Timestamp,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.fillable.is_zero()
    }

    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    pub fn escrow(&self) -> Escrow {
        Escrow {
            margin: self.margin,
            fee_reserve: self.fee_reserve,
        }
    }

    // 2.1: consume `quantity` and hand back the escrow slice that backed it
    pub fn take_fill(&mut self, quantity: Decimal) -> Escrow {
        debug_assert!(quantity <= self.fillable, "cannot fill more than fillable");
        let slice = Escrow {
            margin: pro_rata(self.margin, quantity, self.fillable),
            fee_reserve: pro_rata(self.fee_reserve, quantity, self.fillable),
        };
        self.margin -= slice.margin;
        self.fee_reserve -= slice.fee_reserve;
        self.fillable -= quantity;
        slice
    }
}

/// Ascending rank: asks by price, bids by negated price, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BookKey {
    rank: Decimal,
    sequence: u64,
}

impl BookKey {
    fn for_order(order: &Order) -> Self {
        let rank = match order.side {
            Side::Buy => -order.price.value(),
            Side::Sell => order.price.value(),
        };
        Self {
            rank,
            sequence: order.sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    pub market_id: MarketId,
    bids: BTreeMap<BookKey, Order>,
    asks: BTreeMap<BookKey, Order>,
    index: BTreeMap<OrderHash, (Side, BookKey)>,
}

impl OrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: BTreeMap::new(),
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<BookKey, Order> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<BookKey, Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn best_order(&self, side: Side) -> Option<&Order> {
        self.side(side).values().next()
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.best_order(Side::Buy).map(|o| o.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.best_order(Side::Sell).map(|o| o.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.value() + ask.value()) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.value() - bid.value()),
            _ => None,
        }
    }

    /// Best price first, then earliest insertion.
    pub fn orders_by_direction(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.side(side).values()
    }

    pub fn insert(&mut self, order: Order) {
        let key = BookKey::for_order(&order);
        let side = order.side;
        self.index.insert(order.hash, (side, key));
        self.side_mut(side).insert(key, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<Order> {
        let (side, key) = self.index.remove(hash)?;
        self.side_mut(side).remove(&key)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&Order> {
        let (side, key) = self.index.get(hash)?;
        self.side(*side).get(key)
    }

    pub fn get_mut(&mut self, hash: &OrderHash) -> Option<&mut Order> {
        let (side, key) = *self.index.get(hash)?;
        self.side_mut(side).get_mut(&key)
    }

    pub fn contains(&self, hash: &OrderHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Would an order at `price` on `side` trade against the other side right now?
    pub fn would_cross(&self, side: Side, price: Price) -> bool {
        match self.best_order(side.opposite()) {
            Some(best) => side.crosses(price, best.price),
            None => false,
        }
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Hashes owned by `subaccount`, in insertion order.
    pub fn orders_of(&self, subaccount: SubaccountId) -> Vec<OrderHash> {
        let mut owned: Vec<&Order> = self
            .bids
            .values()
            .chain(self.asks.values())
            .filter(|o| o.subaccount_id == subaccount)
            .collect();
        owned.sort_by_key(|o| o.sequence);
        owned.into_iter().map(|o| o.hash).collect()
    }

    /// Every resting order, in insertion order.
    pub fn all_orders(&self) -> Vec<&Order> {
        let mut all: Vec<&Order> = self.bids.values().chain(self.asks.values()).collect();
        all.sort_by_key(|o| o.sequence);
        all
    }

    pub fn levels(&self, side: Side, max_levels: usize) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();
        for order in self.side(side).values() {
            match levels.last_mut() {
                Some(level) if level.price == order.price => {
                    level.quantity += order.fillable;
                    level.order_count += 1;
                }
                _ => {
                    if levels.len() >= max_levels {
                        break;
                    }
                    levels.push(PriceLevel {
                        price: order.price,
                        quantity: order.fillable,
                        order_count: 1,
                    });
                }
            }
        }
        levels
    }

    pub fn depth(&self, side: Side) -> Decimal {
        self.side(side).values().map(|o| o.fillable).sum()
    }

    pub fn order_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// One execution between a resting maker and a taker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub market_id: MarketId,
    pub maker_order: OrderHash,
    pub maker_subaccount: SubaccountId,
    /// none for forced liquidation orders
    pub taker_order: Option<OrderHash>,
    pub taker_subaccount: SubaccountId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price.value() * self.quantity
    }
}
