// 8.0 engine/core.rs: the engine owns the ledger, the oracle handle and the event log.
// 8.1 every external entry point runs inside `transact`: the ledger opens a journal
// level, the operation mutates it in place, and an error rolls back exactly the
// entries it touched.

use super::config::EngineConfig;
use super::ledger::{Ledger, LedgerMark};
use super::results::EngineError;
use crate::account::{AccountError, Deposit};
use crate::events::{BalanceEvent, Event, EventLog, EventPayload};
use crate::insurance::InsuranceFund;
use crate::mark_price::resolve_mark_price;
use crate::market::Market;
use crate::oracle::{PriceOracle, StaticOracle};
use crate::order::{Order, OrderBook};
use crate::position::Position;
use crate::types::{BlockInfo, Denom, MarketId, OrderHash, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/** 8.1: main engine struct. all state lives in the ledger */
#[derive(Debug)]
pub struct Engine<O = StaticOracle> {
    pub(super) config: EngineConfig,
    pub(super) oracle: O,
    pub(super) ledger: Ledger,
    pub(super) block: BlockInfo,
    /// payloads of the running transition, stamped into the log on commit
    pub(super) staged: Vec<EventPayload>,
    pub(super) events: EventLog,
}

/// Restore point for a transition or a nested step inside one.
pub(super) struct Snapshot {
    mark: LedgerMark,
    block: BlockInfo,
    staged: usize,
}

impl<O: PriceOracle> Engine<O> {
    pub fn new(config: EngineConfig, oracle: O) -> Result<Self, EngineError> {
        config.validate()?;
        let events = EventLog::new(config.max_events);
        Ok(Self {
            config,
            oracle,
            ledger: Ledger::default(),
            block: BlockInfo::default(),
            staged: Vec::new(),
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Price feeds change between blocks; the engine only reads them.
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub fn block(&self) -> BlockInfo {
        self.block
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn market(&self, market_id: MarketId) -> Option<&Market> {
        self.ledger.markets.get(&market_id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.ledger.markets.values()
    }

    pub fn order_book(&self, market_id: MarketId) -> Option<&OrderBook> {
        self.ledger.books.get(&market_id)
    }

    pub fn order(&self, market_id: MarketId, hash: &OrderHash) -> Option<&Order> {
        self.ledger
            .books
            .get(&market_id)
            .and_then(|b| b.get(hash))
            .or_else(|| self.ledger.conditional.get(&market_id).and_then(|c| c.get(hash)))
    }

    pub fn position(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&Position> {
        self.ledger.positions.get(&(market_id, subaccount_id))
    }

    pub fn deposit_of(&self, subaccount_id: SubaccountId, denom: &Denom) -> Deposit {
        self.ledger.balances.get(subaccount_id, denom)
    }

    pub fn insurance_fund(&self, market_id: MarketId) -> Option<&InsuranceFund> {
        self.ledger.insurance_funds.get(&market_id)
    }

    pub fn fee_pool(&self, denom: &Denom) -> Decimal {
        self.ledger.fee_pool.get(denom).copied().unwrap_or_default()
    }

    pub fn accounted_supply(&self, denom: &Denom) -> Decimal {
        self.ledger
            .accounted_supply(denom, &self.config.params.auction.bid_denom)
    }

    /// Mark price against the committed book and the current oracle reading.
    pub fn mark_price(&self, market_id: MarketId) -> Option<Decimal> {
        let market = self.ledger.markets.get(&market_id)?;
        self.live_mark_price(market)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn recent_events(&self, count: usize) -> Vec<&Event> {
        self.events.recent(count)
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    // 8.2: balances
    pub fn deposit(&mut self, subaccount_id: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount).into());
        }
        self.transact(|e| {
            let held = e.ledger.balances.get(subaccount_id, denom).total;
            if held.checked_add(amount).is_none() {
                return Err(EngineError::Overflow("deposit"));
            }
            e.ledger.balances.credit(subaccount_id, denom, amount);
            e.emit(EventPayload::Deposit(BalanceEvent {
                subaccount_id,
                denom: denom.clone(),
                amount,
            }));
            Ok(())
        })
    }

    // only free balance leaves; escrow stays with its orders
    pub fn withdraw(&mut self, subaccount_id: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount).into());
        }
        self.transact(|e| {
            e.ledger.balances.debit(subaccount_id, denom, amount)?;
            e.emit(EventPayload::Withdrawal(BalanceEvent {
                subaccount_id,
                denom: denom.clone(),
                amount,
            }));
            Ok(())
        })
    }

    // 8.3: transactions
    pub(super) fn snapshot(&mut self) -> Snapshot {
        Snapshot {
            mark: self.ledger.begin(),
            block: self.block,
            staged: self.staged.len(),
        }
    }

    pub(super) fn discard(&mut self, snapshot: Snapshot) {
        self.ledger.discard(snapshot.mark);
        self.block = snapshot.block;
        self.staged.truncate(snapshot.staged);
    }

    /// Closes the outermost level and stamps the staged events into the log.
    pub(super) fn commit(&mut self) {
        self.ledger.commit();
        let height = self.block.height;
        let time = self.block.time;
        for payload in self.staged.drain(..) {
            self.events.push(height, time, payload);
        }
    }

    /// Runs a whole transition: commit on Ok, discard on Err.
    pub(super) fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let snapshot = self.snapshot();
        match op(self) {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, kind = ?err.kind(), "transition discarded");
                self.discard(snapshot);
                self.staged.clear();
                Err(err)
            }
        }
    }

    /// Nested step inside a transition. rolls back only its own writes.
    pub(super) fn attempt<T, E>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        let snapshot = self.snapshot();
        let result = op(self);
        match result {
            Ok(_) => self.ledger.commit(),
            Err(_) => self.discard(snapshot),
        }
        result
    }

    pub(super) fn emit(&mut self, payload: EventPayload) {
        self.staged.push(payload);
    }

    // 8.4: lookups shared by the impl blocks
    pub(super) fn market_ref(&self, market_id: MarketId) -> Result<&Market, EngineError> {
        self.ledger
            .markets
            .get(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn market_mut(&mut self, market_id: MarketId) -> Result<&mut Market, EngineError> {
        self.ledger
            .markets
            .get_mut(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn book_mut(&mut self, market_id: MarketId) -> Result<&mut OrderBook, EngineError> {
        self.ledger
            .books
            .get_mut(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn oracle_price(&self, market: &Market) -> Option<Decimal> {
        self.oracle.mark_price(market).filter(|p| *p > Decimal::ZERO)
    }

    pub(super) fn live_mark_price(&self, market: &Market) -> Option<Decimal> {
        let oracle = self.oracle_price(market);
        let book = self.ledger.books.get(&market.id);
        let best_bid = book.and_then(|b| b.best_bid()).map(|p| p.value());
        let best_ask = book.and_then(|b| b.best_ask()).map(|p| p.value());
        resolve_mark_price(oracle, best_bid, best_ask, &self.config.params.mark_price)
    }

    pub(super) fn next_order_hash(&mut self, subaccount_id: SubaccountId) -> OrderHash {
        let nonce = self.ledger.counters.nonces.entry_or_default(subaccount_id);
        *nonce += 1;
        OrderHash::derive(subaccount_id, *nonce)
    }

    pub(super) fn next_order_sequence(&mut self) -> u64 {
        self.ledger.counters.order_sequence += 1;
        self.ledger.counters.order_sequence
    }

    pub(super) fn next_position_sequence(&mut self) -> u64 {
        self.ledger.counters.position_sequence += 1;
        self.ledger.counters.position_sequence
    }

    pub(super) fn credit_fee_pool(&mut self, denom: &Denom, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        *self.ledger.fee_pool.entry_or_default(denom.clone()) += amount;
        debug!(%denom, %amount, "fee pool credited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use rust_decimal_macros::dec;

    fn usdt() -> Denom {
        Denom::from("usdt")
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::for_tests(), StaticOracle::new()).unwrap()
    }

    #[test]
    fn discarded_transition_keeps_the_clock_and_balances() {
        let mut engine = engine();
        engine.deposit(SubaccountId(1), &usdt(), dec!(10)).unwrap();
        let before = engine.block();

        let result: Result<(), EngineError> = engine.transact(|e| {
            e.block = BlockInfo {
                height: 9,
                time: Timestamp::from_secs(900),
            };
            e.ledger.balances.credit(SubaccountId(1), &usdt(), dec!(5));
            e.ledger.balances.credit(SubaccountId(2), &usdt(), dec!(5));
            Err(EngineError::OrderNotFound(OrderHash::derive(SubaccountId(1), 1)))
        });

        assert!(result.is_err());
        assert_eq!(engine.block(), before);
        assert_eq!(engine.deposit_of(SubaccountId(1), &usdt()).total, dec!(10));
        assert_eq!(engine.ledger().balances.iter().count(), 1);
    }

    #[test]
    fn failed_step_rolls_back_only_its_own_writes() {
        let mut engine = engine();
        engine
            .transact(|e| {
                e.ledger.balances.credit(SubaccountId(1), &usdt(), dec!(10));
                let step: Result<(), EngineError> = e.attempt(|e| {
                    e.ledger.balances.credit(SubaccountId(1), &usdt(), dec!(7));
                    e.credit_fee_pool(&usdt(), dec!(1));
                    Err(EngineError::OrderNotFound(OrderHash::derive(SubaccountId(1), 1)))
                });
                assert!(step.is_err());
                e.attempt(|e| {
                    e.credit_fee_pool(&usdt(), dec!(2));
                    Ok::<(), EngineError>(())
                })
            })
            .unwrap();

        assert_eq!(engine.deposit_of(SubaccountId(1), &usdt()).total, dec!(10));
        assert_eq!(engine.fee_pool(&usdt()), dec!(2));
    }

    #[test]
    fn order_counters_rewind_with_the_transition() {
        let mut engine = engine();
        let result: Result<(), EngineError> = engine.transact(|e| {
            e.next_order_sequence();
            e.next_order_hash(SubaccountId(3));
            Err(EngineError::OrderNotFound(OrderHash::derive(SubaccountId(3), 1)))
        });
        assert!(result.is_err());
        assert_eq!(engine.ledger().counters.order_sequence, 0);
        assert!(engine.ledger().counters.nonces.is_empty());
    }
}
