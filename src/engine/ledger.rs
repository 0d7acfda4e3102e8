// 8.0.1 engine/ledger.rs: every piece of mutable exchange state, keyed by id.
// orders and positions refer to markets and subaccounts by key only, never by
// reference. keyed state sits in journaled maps, so a transaction restore point
// costs the entries it touched plus the few scalars copied into a `LedgerMark`.

use crate::account::Balances;
use crate::auction::AuctionState;
use crate::conditional::ConditionalOrderBook;
use crate::fees::{FeeDiscountSchedule, TradingRewardCampaign, TradingStats};
use crate::insurance::InsuranceFund;
use crate::journal::Journaled;
use crate::market::Market;
use crate::order::OrderBook;
use crate::position::Position;
use crate::types::{Denom, MarketId, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub order_sequence: u64,
    pub position_sequence: u64,
    /// per-subaccount nonce feeding order hashes
    pub nonces: Journaled<SubaccountId, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub markets: Journaled<MarketId, Market>,
    pub books: Journaled<MarketId, OrderBook>,
    pub conditional: Journaled<MarketId, ConditionalOrderBook>,
    pub positions: Journaled<(MarketId, SubaccountId), Position>,
    pub balances: Balances,
    pub insurance_funds: Journaled<MarketId, InsuranceFund>,
    /// exchange share of fees waiting for the next auction round
    pub fee_pool: Journaled<Denom, Decimal>,
    pub burned: Journaled<Denom, Decimal>,
    pub auction: AuctionState,
    pub fee_discounts: Option<FeeDiscountSchedule>,
    pub campaign: Option<TradingRewardCampaign>,
    pub stats: Journaled<SubaccountId, TradingStats>,
    pub counters: Counters,
}

/// Unkeyed ledger state as it stood when a level opened.
#[derive(Debug, Clone)]
pub(crate) struct LedgerMark {
    auction: AuctionState,
    fee_discounts: Option<FeeDiscountSchedule>,
    campaign: Option<TradingRewardCampaign>,
    order_sequence: u64,
    position_sequence: u64,
}

impl Ledger {
    // 8.0.3: restore points. every journaled map opens and closes levels together
    pub(crate) fn begin(&mut self) -> LedgerMark {
        self.markets.begin();
        self.books.begin();
        self.conditional.begin();
        self.positions.begin();
        self.balances.begin();
        self.insurance_funds.begin();
        self.fee_pool.begin();
        self.burned.begin();
        self.stats.begin();
        self.counters.nonces.begin();
        LedgerMark {
            auction: self.auction.clone(),
            fee_discounts: self.fee_discounts.clone(),
            campaign: self.campaign.clone(),
            order_sequence: self.counters.order_sequence,
            position_sequence: self.counters.position_sequence,
        }
    }

    pub(crate) fn commit(&mut self) {
        self.markets.commit();
        self.books.commit();
        self.conditional.commit();
        self.positions.commit();
        self.balances.commit();
        self.insurance_funds.commit();
        self.fee_pool.commit();
        self.burned.commit();
        self.stats.commit();
        self.counters.nonces.commit();
    }

    pub(crate) fn discard(&mut self, mark: LedgerMark) {
        self.markets.discard();
        self.books.discard();
        self.conditional.discard();
        self.positions.discard();
        self.balances.discard();
        self.insurance_funds.discard();
        self.fee_pool.discard();
        self.burned.discard();
        self.stats.discard();
        self.counters.nonces.discard();
        self.auction = mark.auction;
        self.fee_discounts = mark.fee_discounts;
        self.campaign = mark.campaign;
        self.counters.order_sequence = mark.order_sequence;
        self.counters.position_sequence = mark.position_sequence;
    }


    /// Positions of one market in sweep order (insertion sequence).
    pub fn positions_in(&self, market_id: MarketId) -> Vec<(SubaccountId, Position)> {
        let mut found: Vec<(SubaccountId, Position)> = self
            .positions
            .range((market_id, SubaccountId(0))..=(market_id, SubaccountId(u64::MAX)))
            .map(|((_, sub), p)| (*sub, p.clone()))
            .collect();
        found.sort_by_key(|(_, p)| p.sequence);
        found
    }

    /// Everything the exchange holds in `denom`, including what has been burned.
    ///
    /// Open positions count at their margin minus entry value and pending
    /// funding; the mark-price legs cancel across longs and shorts of a market.
    /// The standing auction bid is held in `bid_denom`.
    pub fn accounted_supply(&self, denom: &Denom, bid_denom: &Denom) -> Decimal {
        let deposits = self.balances.total_of(denom);

        let positions: Decimal = self
            .positions
            .iter()
            .filter(|((market_id, _), _)| {
                self.markets
                    .get(market_id)
                    .map_or(false, |m| &m.quote_denom == denom)
            })
            .map(|((market_id, _), p)| {
                let cumulative = self
                    .markets
                    .get(market_id)
                    .map(|m| m.cumulative_funding())
                    .unwrap_or_default();
                let direction = if p.is_long { Decimal::ONE } else { Decimal::NEGATIVE_ONE };
                p.margin - direction * p.quantity * p.entry_price - p.pending_funding(cumulative)
            })
            .sum();

        let insurance: Decimal = self
            .insurance_funds
            .values()
            .filter(|f| &f.deposit_denom == denom)
            .map(|f| f.balance)
            .sum();

        let pooled = self.fee_pool.get(denom).copied().unwrap_or_default();
        let basket = self.auction.basket.get(denom).copied().unwrap_or_default();
        let burned = self.burned.get(denom).copied().unwrap_or_default();
        let bid = match self.auction.highest_bid {
            Some(bid) if denom == bid_denom => bid.amount,
            _ => Decimal::ZERO,
        };

        deposits + positions + insurance + pooled + basket + burned + bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use rust_decimal_macros::dec;

    #[test]
    fn positions_come_back_in_sequence_order() {
        let mut ledger = Ledger::default();
        let m = MarketId::derive(&["m"]);
        let other = MarketId::derive(&["other"]);
        ledger
            .positions
            .insert((m, SubaccountId(1)), Position::empty(7, dec!(0), Timestamp::from_secs(0)));
        ledger
            .positions
            .insert((m, SubaccountId(9)), Position::empty(3, dec!(0), Timestamp::from_secs(0)));
        ledger
            .positions
            .insert((other, SubaccountId(2)), Position::empty(1, dec!(0), Timestamp::from_secs(0)));

        let subs: Vec<u64> = ledger.positions_in(m).iter().map(|(s, _)| s.0).collect();
        assert_eq!(subs, vec![9, 1]);
    }

    #[test]
    fn supply_counts_pools_and_burns() {
        let mut ledger = Ledger::default();
        let usdt = Denom::from("usdt");
        ledger.balances.credit(SubaccountId(1), &usdt, dec!(100));
        ledger.fee_pool.insert(usdt.clone(), dec!(3));
        ledger.burned.insert(usdt.clone(), dec!(2));
        assert_eq!(ledger.accounted_supply(&usdt, &Denom::from("inj")), dec!(105));
    }

    #[test]
    fn discard_returns_to_the_mark() {
        let mut ledger = Ledger::default();
        let usdt = Denom::from("usdt");
        ledger.balances.credit(SubaccountId(1), &usdt, dec!(100));

        let mark = ledger.begin();
        ledger.balances.credit(SubaccountId(1), &usdt, dec!(50));
        ledger.balances.credit(SubaccountId(2), &usdt, dec!(5));
        *ledger.fee_pool.entry_or_default(usdt.clone()) += dec!(1);
        ledger.counters.order_sequence += 3;
        ledger.discard(mark);

        assert_eq!(ledger.balances.get(SubaccountId(1), &usdt).total, dec!(100));
        assert_eq!(ledger.balances.iter().count(), 1);
        assert!(ledger.fee_pool.is_empty());
        assert_eq!(ledger.counters.order_sequence, 0);
    }
}
