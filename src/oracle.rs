// 9.0: price feed seam. the engine only ever reads prices through PriceOracle;
// staleness and aggregation belong to whatever sits behind the trait.
// StaticOracle is the in-memory feed used by tests and the simulator.

use crate::market::Market;
use crate::types::MarketId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub trait PriceOracle {
    /// Price of `base` in `quote`, if the feed has a fresh one.
    fn reference_price(&self, base: &str, quote: &str) -> Option<Decimal>;

    /// Oracle price for a market. defaults to its oracle pair.
    fn mark_price(&self, market: &Market) -> Option<Decimal> {
        let oracle = market.oracle.as_ref()?;
        self.reference_price(&oracle.base, &oracle.quote)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticOracle {
    pairs: BTreeMap<(String, String), Decimal>,
    /// per-market overrides, e.g. binary option provider feeds
    markets: BTreeMap<MarketId, Decimal>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, base: &str, quote: &str, price: Decimal) {
        self.pairs.insert((base.to_string(), quote.to_string()), price);
    }

    pub fn clear_price(&mut self, base: &str, quote: &str) {
        self.pairs.remove(&(base.to_string(), quote.to_string()));
    }

    pub fn set_market_price(&mut self, market_id: MarketId, price: Decimal) {
        self.markets.insert(market_id, price);
    }

    pub fn with_price(mut self, base: &str, quote: &str, price: Decimal) -> Self {
        self.set_price(base, quote, price);
        self
    }
}

impl PriceOracle for StaticOracle {
    fn reference_price(&self, base: &str, quote: &str) -> Option<Decimal> {
        if base == quote {
            return Some(Decimal::ONE);
        }
        if let Some(price) = self.pairs.get(&(base.to_string(), quote.to_string())) {
            return Some(*price);
        }
        // inverse quote as a fallback
        self.pairs
            .get(&(quote.to_string(), base.to_string()))
            .filter(|p| !p.is_zero())
            .map(|p| Decimal::ONE / *p)
    }

    fn mark_price(&self, market: &Market) -> Option<Decimal> {
        if let Some(price) = self.markets.get(&market.id) {
            return Some(*price);
        }
        let oracle = market.oracle.as_ref()?;
        self.reference_price(&oracle.base, &oracle.quote)
    }
}
