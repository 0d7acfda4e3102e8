// 8.0: the exchange engine. owns every market, book, position and balance and
// advances them one transition at a time. deterministic, no I/O: the only
// inputs are the calls made on it, the block clock and the oracle.

mod auction;
mod blocks;
mod config;
mod core;
mod funding;
mod genesis;
mod insurance;
mod ledger;
mod lifecycle;
mod liquidations;
mod matching;
mod orders;
mod positions;
mod results;
mod settlement;

pub use config::EngineConfig;
pub use core::Engine;
pub use genesis::{GenesisBalance, GenesisPosition, GenesisState};
pub use insurance::NewInsuranceFund;
pub use ledger::{Counters, Ledger};
pub use lifecycle::ProposalOutcome;
pub use orders::OrderRequest;
pub use results::{
    BeginBlockReport, BlockReport, EngineError, ErrorKind, FundingResult, LiquidationResult, OrderOutcome,
    OrderStatus, SettlementResult, SkippedLiquidation,
};
