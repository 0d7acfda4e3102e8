// 11.0: every committed state change leaves an event behind. the engine stages
// payloads while a transition runs and only stamps them into the log on commit,
// so a discarded transition leaves no trace here.

use crate::market::{MarketStatus, MarketType};
use crate::order::{Fill, OrderType};
use crate::types::{Denom, MarketId, OrderHash, Side, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub height: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // balances
    Deposit(BalanceEvent),
    Withdrawal(BalanceEvent),

    // orders and trades
    OrderPlaced(OrderPlacedEvent),
    OrderCancelled(OrderCancelledEvent),
    ConditionalTriggered(ConditionalTriggeredEvent),
    Fill(Fill),

    // positions
    PositionUpdated(PositionUpdatedEvent),
    PositionMarginIncreased(PositionMarginEvent),
    FundingUpdated(FundingUpdatedEvent),
    Liquidation(LiquidationEvent),

    // markets
    MarketLaunched(MarketLaunchedEvent),
    MarketParamsUpdated(MarketId),
    MarketStatusChanged(MarketStatusChangedEvent),
    MarketSettled(MarketSettledEvent),
    FeeDiscountScheduleSet,
    TradingRewardCampaignSet,

    // insurance
    InsuranceFundCreated(InsuranceEvent),
    InsuranceUnderwritten(InsuranceEvent),
    RedemptionRequested(RedemptionEvent),
    RedemptionPaid(RedemptionEvent),

    // burn auction
    AuctionBid(AuctionBidEvent),
    AuctionRoundSettled(AuctionRoundEvent),

    InvariantViolation(InvariantViolationEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub subaccount_id: SubaccountId,
    pub denom: Denom,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub margin: Decimal,
    pub reduce_only: bool,
    pub conditional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    /// unfilled remainder of a market order
    Unfilled,
    ReduceOnlyExcess,
    /// the owner could not pay for a fill
    FillFailed,
    TriggerFailed,
    Liquidation,
    MarketExpired,
    Settlement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalTriggeredEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub mark_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub is_long: bool,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMarginEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub source: SubaccountId,
    pub amount: Decimal,
    pub margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingUpdatedEvent {
    pub market_id: MarketId,
    pub rate: Decimal,
    pub cumulative_funding: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub liquidator: Option<SubaccountId>,
    pub quantity: Decimal,
    pub mark_price: Decimal,
    pub payout: Decimal,
    pub liquidator_reward: Decimal,
    /// positive when the fund received, negative when it covered a deficit
    pub insurance_delta: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLaunchedEvent {
    pub market_id: MarketId,
    pub ticker: String,
    pub market_type: MarketType,
    /// set for instant listings
    pub listed_by: Option<SubaccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatusChangedEvent {
    pub market_id: MarketId,
    pub from: MarketStatus,
    pub to: MarketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSettledEvent {
    pub market_id: MarketId,
    /// none when positions closed at their own entry
    pub settlement_price: Option<Decimal>,
    pub positions_closed: usize,
    pub insurance_draw: Decimal,
    pub haircut: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub amount: Decimal,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    pub market_id: MarketId,
    pub redemption_id: u64,
    pub redeemer: SubaccountId,
    pub shares: Decimal,
    /// zero while the request is still pending
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionBidEvent {
    pub round: u64,
    pub bidder: SubaccountId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRoundEvent {
    pub round: u64,
    pub winner: Option<SubaccountId>,
    pub amount_burned: Decimal,
    pub basket: BTreeMap<Denom, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolationEvent {
    pub market_id: MarketId,
    pub subaccount_id: Option<SubaccountId>,
    pub description: String,
}

/// Committed events, oldest evicted once `max_events` is reached.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn push(&mut self, height: u64, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push_back(Event {
            id,
            height,
            timestamp,
            payload,
        });
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn recent(&self, count: usize) -> Vec<&Event> {
        let skip = self.events.len().saturating_sub(count);
        self.events.iter().skip(skip).collect()
    }

    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
