// exchange-core: deterministic trading core of an order-book exchange.
// spot, perpetual, expiry futures and binary options markets share one ledger.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, SubaccountId, OrderHash, Denom, Price, Timestamp
//   2.x  order.rs: orders, escrow slices and the price-time order book
//   2.1x conditional.rs: stop / take orders parked until triggered
//   3.x  margin.rs: initial margin, binary collateral, fee reserves
//   4.x  position.rs: net positions, pnl, extend/reduce/flip
//   5.x  funding.rs: premium accrual and the cumulative funding index
//   6.x  liquidation.rs: liquidation test and payout split
//   7.x  config.rs, fees.rs: exchange params, fee discounts, reward campaigns
//   8.x  engine/: ledger, transactions, matching, lifecycle, block driver
//   9.x  oracle.rs: price feed seam
//   10.x account.rs, insurance.rs: deposits and insurance funds
//   11.x events.rs: committed state transition events
//   12.x market.rs, proposal.rs: market definitions and governance
//   13.x mark_price.rs: oracle-anchored mark price
//   14.x auction.rs: burn auction over pooled fees
//   15.x journal.rs: key-level undo log behind engine transactions

// core trading modules
pub mod account;
pub mod engine;
pub mod events;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod mark_price;
pub mod market;
pub mod order;
pub mod position;
pub mod types;

// order and market extensions
pub mod conditional;
pub mod fees;
pub mod proposal;

// integration modules
pub mod auction;
pub mod config;
pub mod insurance;
pub mod journal;
pub mod oracle;

// re exports for convenience
pub use account::*;
pub use auction::*;
pub use conditional::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use fees::*;
pub use funding::*;
pub use insurance::*;
pub use journal::*;
pub use liquidation::*;
pub use margin::*;
pub use mark_price::*;
pub use market::*;
pub use oracle::*;
pub use order::*;
pub use position::*;
pub use proposal::*;
pub use types::*;
