//! Genesis export and import.
//!
//! A genesis state is the whole ledger flattened into plain lists. Exporting
//! and importing it again yields an engine that behaves identically, so it is
//! also how a node restarts from a checkpoint.

use super::config::EngineConfig;
use super::core::Engine;
use super::ledger::{Counters, Ledger};
use super::results::EngineError;
use crate::account::Deposit;
use crate::auction::AuctionState;
use crate::conditional::ConditionalOrderBook;
use crate::config::ExchangeParams;
use crate::fees::{FeeDiscountSchedule, StatsBySubaccount, TradingRewardCampaign};
use crate::insurance::InsuranceFund;
use crate::market::{Market, MarketType};
use crate::oracle::PriceOracle;
use crate::order::{Order, OrderBook};
use crate::position::Position;
use crate::types::{BlockInfo, Denom, MarketId, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub subaccount_id: SubaccountId,
    pub denom: Denom,
    pub deposit: Deposit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisPosition {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub params: ExchangeParams,
    pub block: BlockInfo,
    pub markets: Vec<Market>,
    /// resting orders, by market then sequence
    pub orders: Vec<Order>,
    pub conditional_orders: Vec<Order>,
    pub positions: Vec<GenesisPosition>,
    pub balances: Vec<GenesisBalance>,
    pub insurance_funds: Vec<InsuranceFund>,
    pub fee_pool: BTreeMap<Denom, Decimal>,
    pub burned: BTreeMap<Denom, Decimal>,
    pub auction: AuctionState,
    pub fee_discounts: Option<FeeDiscountSchedule>,
    pub campaign: Option<TradingRewardCampaign>,
    pub stats: StatsBySubaccount,
    pub counters: Counters,
}

impl GenesisState {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::InvalidGenesis(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidGenesis(e.to_string()))
    }
}

impl<O: PriceOracle> Engine<O> {
    pub fn export_genesis(&self) -> GenesisState {
        let ledger = &self.ledger;
        let orders = ledger
            .books
            .values()
            .flat_map(|book| book.all_orders().into_iter().cloned())
            .collect();
        let conditional_orders = ledger
            .conditional
            .values()
            .flat_map(|book| book.iter().cloned())
            .collect();
        let positions = ledger
            .positions
            .iter()
            .map(|((market_id, subaccount_id), position)| GenesisPosition {
                market_id: *market_id,
                subaccount_id: *subaccount_id,
                position: position.clone(),
            })
            .collect();
        let balances = ledger
            .balances
            .iter()
            .filter(|(_, deposit)| !deposit.is_empty())
            .map(|((subaccount_id, denom), deposit)| GenesisBalance {
                subaccount_id: *subaccount_id,
                denom: denom.clone(),
                deposit: *deposit,
            })
            .collect();

        GenesisState {
            params: self.config.params.clone(),
            block: self.block,
            markets: ledger.markets.values().cloned().collect(),
            orders,
            conditional_orders,
            positions,
            balances,
            insurance_funds: ledger.insurance_funds.values().cloned().collect(),
            fee_pool: (*ledger.fee_pool).clone(),
            burned: (*ledger.burned).clone(),
            auction: ledger.auction.clone(),
            fee_discounts: ledger.fee_discounts.clone(),
            campaign: ledger.campaign.clone(),
            stats: (*ledger.stats).clone(),
            counters: ledger.counters.clone(),
        }
    }

    /// Rebuild an engine from `state`. The state's parameters replace those in
    /// `config`; every cross reference is checked before anything is accepted.
    pub fn from_genesis(mut config: EngineConfig, oracle: O, state: GenesisState) -> Result<Self, EngineError> {
        config.params = state.params;
        let mut engine = Engine::new(config, oracle)?;
        let ledger = build_ledger(state.markets, state.insurance_funds, state.counters)?;
        engine.ledger = ledger;
        engine.block = state.block;

        for order in state.orders {
            check_order(&engine.ledger, &order, false)?;
            let book = engine
                .ledger
                .books
                .get_mut(&order.market_id)
                .ok_or(EngineError::MarketNotFound(order.market_id))?;
            book.insert(order);
        }
        for order in state.conditional_orders {
            check_order(&engine.ledger, &order, true)?;
            let book = engine
                .ledger
                .conditional
                .get_mut(&order.market_id)
                .ok_or(EngineError::MarketNotFound(order.market_id))?;
            book.insert(order);
        }

        for entry in state.positions {
            check_position(&engine.ledger, &entry)?;
            engine
                .ledger
                .positions
                .insert((entry.market_id, entry.subaccount_id), entry.position);
        }

        for balance in state.balances {
            let deposit = balance.deposit;
            if deposit.available < Decimal::ZERO || deposit.available > deposit.total {
                return Err(invalid(format!(
                    "deposit of {} in {} is inconsistent",
                    balance.subaccount_id, balance.denom
                )));
            }
            engine.ledger.balances.insert(balance.subaccount_id, balance.denom, deposit);
        }
        check_escrow(&engine.ledger)?;

        engine.ledger.fee_pool = state.fee_pool.into();
        engine.ledger.burned = state.burned.into();
        engine.ledger.auction = state.auction;
        engine.ledger.fee_discounts = state.fee_discounts;
        engine.ledger.campaign = state.campaign;
        engine.ledger.stats = state.stats.into();

        info!(
            height = engine.block.height,
            markets = engine.ledger.markets.len(),
            positions = engine.ledger.positions.len(),
            "genesis imported"
        );
        Ok(engine)
    }
}

fn invalid(reason: String) -> EngineError {
    EngineError::InvalidGenesis(reason)
}

fn build_ledger(markets: Vec<Market>, funds: Vec<InsuranceFund>, counters: Counters) -> Result<Ledger, EngineError> {
    let mut ledger = Ledger {
        counters,
        ..Ledger::default()
    };
    for market in markets {
        let id = market.id;
        if ledger.markets.insert(id, market).is_some() {
            return Err(invalid(format!("market {id} listed twice")));
        }
        ledger.books.insert(id, OrderBook::new(id));
        ledger.conditional.insert(id, ConditionalOrderBook::new(id));
    }
    for fund in funds {
        let id = fund.market_id;
        if ledger.insurance_funds.insert(id, fund).is_some() {
            return Err(invalid(format!("insurance fund {id} listed twice")));
        }
    }
    // a fund may precede its market, never the other way round
    for market in ledger.markets.values() {
        if market.market_type.is_leveraged() && !ledger.insurance_funds.contains_key(&market.id) {
            return Err(invalid(format!("market {} has no insurance fund", market.id)));
        }
    }
    Ok(ledger)
}

fn check_order(ledger: &Ledger, order: &Order, conditional: bool) -> Result<(), EngineError> {
    let market = ledger
        .markets
        .get(&order.market_id)
        .ok_or_else(|| invalid(format!("order {} references unknown market", order.hash)))?;
    if market.status.is_settled() {
        return Err(invalid(format!("order {} rests in a settled market", order.hash)));
    }
    if order.trigger.is_some() != conditional {
        return Err(invalid(format!("order {} has the wrong trigger kind for its book", order.hash)));
    }
    if order.fillable <= Decimal::ZERO || order.fillable > order.quantity {
        return Err(invalid(format!("order {} has fillable {}", order.hash, order.fillable)));
    }
    if order.sequence > ledger.counters.order_sequence {
        return Err(invalid(format!("order {} is ahead of the order counter", order.hash)));
    }
    let duplicate = ledger
        .books
        .values()
        .any(|b| b.contains(&order.hash))
        || ledger.conditional.values().any(|c| c.get(&order.hash).is_some());
    if duplicate {
        return Err(invalid(format!("order {} listed twice", order.hash)));
    }
    Ok(())
}

fn check_position(ledger: &Ledger, entry: &GenesisPosition) -> Result<(), EngineError> {
    let market = ledger
        .markets
        .get(&entry.market_id)
        .ok_or_else(|| invalid(format!("position of {} references unknown market", entry.subaccount_id)))?;
    if market.market_type == MarketType::Spot {
        return Err(invalid(format!("position in spot market {}", market.id)));
    }
    // any margin is fine, realized funding can leave it below zero
    if entry.position.is_empty() {
        return Err(invalid(format!("position of {} in {} is empty", entry.subaccount_id, market.id)));
    }
    if entry.position.sequence > ledger.counters.position_sequence {
        return Err(invalid(format!(
            "position of {} in {} is ahead of the position counter",
            entry.subaccount_id, market.id
        )));
    }
    Ok(())
}

/// Locked balance must match what the resting and conditional orders hold.
fn check_escrow(ledger: &Ledger) -> Result<(), EngineError> {
    let mut escrowed: BTreeMap<(SubaccountId, Denom), Decimal> = BTreeMap::new();
    let resting = ledger.books.values().flat_map(|b| b.all_orders().into_iter());
    let parked = ledger.conditional.values().flat_map(|c| c.iter());
    for order in resting.chain(parked) {
        let Some(market) = ledger.markets.get(&order.market_id) else {
            continue;
        };
        let (denom, amount) = match (market.market_type, market.base_denom.as_ref()) {
            (MarketType::Spot, Some(base)) if !order.is_buy() => (base.clone(), order.fillable),
            _ => (market.quote_denom.clone(), order.escrow().total()),
        };
        *escrowed.entry((order.subaccount_id, denom)).or_default() += amount;
    }

    let keys: BTreeSet<(SubaccountId, Denom)> = escrowed
        .keys()
        .cloned()
        .chain(ledger.balances.iter().map(|(key, _)| key.clone()))
        .collect();
    for (subaccount_id, denom) in keys {
        let held = escrowed.get(&(subaccount_id, denom.clone())).copied().unwrap_or_default();
        let locked = ledger.balances.get(subaccount_id, &denom).locked();
        if held != locked {
            return Err(invalid(format!(
                "{subaccount_id} has {locked} {denom} locked but orders hold {held}"
            )));
        }
    }
    Ok(())
}
