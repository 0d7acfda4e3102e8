// 8.0.2: result types and errors for engine operations.

use crate::account::AccountError;
use crate::auction::{AuctionError, RoundResult};
use crate::config::ConfigError;
use crate::events::InvariantViolationEvent;
use crate::insurance::InsuranceError;
use crate::market::{MarketError, MarketStatus};
use crate::order::Fill;
use crate::proposal::ProposalError;
use crate::types::{MarketId, OrderHash, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// resting in the book, possibly after partial fills
    Resting,
    Filled,
    /// market order remainder dropped
    PartiallyFilled,
    /// waiting for its trigger price
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    pub order_hash: OrderHash,
    pub status: OrderStatus,
    /// accepted quantity after any reduce-only cap
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingResult {
    pub market_id: MarketId,
    pub rate: Decimal,
    pub cumulative_funding: Decimal,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub liquidator: Option<SubaccountId>,
    pub was_long: bool,
    pub quantity: Decimal,
    pub mark_price: Decimal,
    pub average_price: Decimal,
    /// released margin plus pnl of the forced close, before distribution
    pub payout: Decimal,
    pub liquidator_reward: Decimal,
    pub insurance_delta: Decimal,
    /// part of a deficit taken from the owner's free balance
    pub owner_contribution: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLiquidation {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub market_id: MarketId,
    pub status: MarketStatus,
    pub settlement_price: Option<Decimal>,
    pub positions_closed: usize,
    pub insurance_draw: Decimal,
    /// loss spread over winners once the insurance fund ran dry
    pub haircut: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeginBlockReport {
    pub height: u64,
    pub activated_markets: Vec<MarketId>,
    pub triggered_orders: Vec<OrderHash>,
    pub failed_triggers: Vec<OrderHash>,
}

/// What one end block did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub height: u64,
    pub fills: Vec<Fill>,
    pub funding: Vec<FundingResult>,
    pub liquidations: Vec<LiquidationResult>,
    pub skipped_liquidations: Vec<SkippedLiquidation>,
    pub settled_markets: Vec<SettlementResult>,
    pub redemptions_paid: Decimal,
    pub violations: Vec<InvariantViolationEvent>,
    pub auction: Option<RoundResult>,
}

/// 7.x error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// rejected before any state changed
    Validation,
    /// the transition would break conservation and was discarded
    InvariantViolation,
    /// a required oracle price was missing, failed closed
    MissingPrice,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderHash),

    #[error("No position for {subaccount_id} in {market_id}")]
    PositionNotFound {
        market_id: MarketId,
        subaccount_id: SubaccountId,
    },

    #[error("No mark price available for market {0}")]
    MissingMarkPrice(MarketId),

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("Margin {provided} below required {required}")]
    InsufficientMargin { required: Decimal, provided: Decimal },

    #[error("Post-only order at {price} would cross in {market_id}")]
    PostOnlyWouldCross { market_id: MarketId, price: Decimal },

    #[error("Reduce-only order needs an opposing position in {0}")]
    ReduceOnlyWithoutPosition(MarketId),

    #[error("Reduce-only order of {requested} exceeds position, {available} left to close")]
    ReduceOnlyExceedsPosition { requested: Decimal, available: Decimal },

    #[error("Unsupported order: {0}")]
    UnsupportedOrder(String),

    #[error("Not enough liquidity in {market_id}, {unfilled} left unfilled")]
    InsufficientLiquidity { market_id: MarketId, unfilled: Decimal },

    #[error("Position of {subaccount_id} in {market_id} is not liquidatable")]
    NotLiquidatable {
        market_id: MarketId,
        subaccount_id: SubaccountId,
    },

    #[error("Insurance fund of {market_id} cannot cover {needed}, holds {available}")]
    InsuranceFundInsufficient {
        market_id: MarketId,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Block time went backwards: {previous} -> {next}")]
    NonMonotonicBlock { previous: Timestamp, next: Timestamp },

    #[error("Invalid genesis state: {0}")]
    InvalidGenesis(String),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Insurance error: {0}")]
    Insurance(#[from] InsuranceError),

    #[error("Auction error: {0}")]
    Auction(#[from] AuctionError),

    #[error("Proposal error: {0}")]
    Proposal(#[from] ProposalError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingMarkPrice(_) => ErrorKind::MissingPrice,
            EngineError::InsuranceFundInsufficient { .. }
            | EngineError::Account(AccountError::NegativeBalance { .. })
            | EngineError::Insurance(InsuranceError::Insufficient { .. }) => ErrorKind::InvariantViolation,
            _ => ErrorKind::Validation,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        self.kind() == ErrorKind::InvariantViolation
    }
}
