//! Burn auction over collected exchange fees.
//!
//! Fees accumulate in a pool. Each round auctions the pooled basket for the
//! bid denom; the winning bid is burned and the basket paid to the winner.

use crate::types::{Denom, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionParams {
    /// seconds per round
    pub auction_period: i64,
    pub min_next_bid_increment_rate: Decimal,
    pub bid_denom: Denom,
}

impl Default for AuctionParams {
    fn default() -> Self {
        Self {
            auction_period: 7 * 24 * 3600,
            min_next_bid_increment_rate: dec!(0.0025),
            bid_denom: Denom::from("inj"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: SubaccountId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionState {
    pub round: u64,
    pub ending_timestamp: Timestamp,
    pub highest_bid: Option<Bid>,
    pub basket: BTreeMap<Denom, Decimal>,
}

impl Default for AuctionState {
    fn default() -> Self {
        // round 0 ends immediately; the first end block opens round 1
        Self {
            round: 0,
            ending_timestamp: Timestamp::from_secs(0),
            highest_bid: None,
            basket: BTreeMap::new(),
        }
    }
}

/// Outcome of a round that just closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u64,
    pub winner: Option<Bid>,
    pub basket: BTreeMap<Denom, Decimal>,
}

impl AuctionState {
    /// Smallest amount the next bid must reach.
    pub fn min_next_bid(&self, params: &AuctionParams) -> Decimal {
        match self.highest_bid {
            Some(bid) => bid.amount * (Decimal::ONE + params.min_next_bid_increment_rate),
            None => Decimal::ZERO,
        }
    }

    // 14.1: validates and records a bid. returns the bid it replaced, to be refunded
    pub fn place_bid(
        &mut self,
        bidder: SubaccountId,
        round: u64,
        amount: Decimal,
        params: &AuctionParams,
    ) -> Result<Option<Bid>, AuctionError> {
        if round != self.round {
            return Err(AuctionError::InvalidRound {
                requested: round,
                current: self.round,
            });
        }
        if amount <= Decimal::ZERO {
            return Err(AuctionError::BidTooLow {
                amount,
                minimum: Decimal::ZERO,
            });
        }
        if let Some(current) = self.highest_bid {
            let minimum = self.min_next_bid(params);
            if amount <= current.amount || amount < minimum {
                return Err(AuctionError::BidTooLow { amount, minimum });
            }
        }
        Ok(self.highest_bid.replace(Bid { bidder, amount }))
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        now >= self.ending_timestamp
    }

    // 14.2: close the round. unsold baskets roll into the next one
    pub fn close_round(
        &mut self,
        fee_pool: &mut BTreeMap<Denom, Decimal>,
        now: Timestamp,
        params: &AuctionParams,
    ) -> RoundResult {
        let winner = self.highest_bid.take();
        let basket = if winner.is_some() {
            std::mem::take(&mut self.basket)
        } else {
            BTreeMap::new()
        };
        let result = RoundResult {
            round: self.round,
            winner,
            basket,
        };

        for (denom, amount) in std::mem::take(fee_pool) {
            *self.basket.entry(denom).or_default() += amount;
        }
        self.basket.retain(|_, amount| !amount.is_zero());
        self.round += 1;
        self.ending_timestamp = now.plus_secs(params.auction_period);
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuctionError {
    #[error("Bid for round {requested}, current round is {current}")]
    InvalidRound { requested: u64, current: u64 },

    #[error("Bid {amount} below minimum {minimum}")]
    BidTooLow { amount: Decimal, minimum: Decimal },
}
