//! Conditional (stop / take) orders.
//!
//! Held outside the order book with their escrow already taken. At begin
//! block the engine asks which ones the new mark price has triggered and
//! re-places them as ordinary orders, oldest first.

use crate::order::Order;
use crate::types::{MarketId, OrderHash, SubaccountId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalOrderBook {
    pub market_id: MarketId,
    by_sequence: BTreeMap<u64, Order>,
    index: BTreeMap<OrderHash, u64>,
}

impl ConditionalOrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            by_sequence: BTreeMap::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, order: Order) {
        debug_assert!(order.trigger.is_some(), "conditional order without trigger");
        self.index.insert(order.hash, order.sequence);
        self.by_sequence.insert(order.sequence, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<Order> {
        let sequence = self.index.remove(hash)?;
        self.by_sequence.remove(&sequence)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&Order> {
        let sequence = self.index.get(hash)?;
        self.by_sequence.get(sequence)
    }

    pub fn orders_of(&self, subaccount: SubaccountId) -> Vec<OrderHash> {
        self.by_sequence
            .values()
            .filter(|o| o.subaccount_id == subaccount)
            .map(|o| o.hash)
            .collect()
    }

    /// Orders whose trigger the mark price has reached, oldest first.
    pub fn triggered(&self, mark_price: Decimal) -> Vec<OrderHash> {
        self.by_sequence
            .values()
            .filter(|o| o.trigger.map_or(false, |t| t.is_triggered(o.side, mark_price)))
            .map(|o| o.hash)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.by_sequence.values()
    }

    pub fn hashes(&self) -> Vec<OrderHash> {
        self.by_sequence.values().map(|o| o.hash).collect()
    }

    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }
}
