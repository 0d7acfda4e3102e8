//! Burn auction: bids in, basket out.

use super::core::Engine;
use super::results::EngineError;
use crate::auction::RoundResult;
use crate::events::{AuctionBidEvent, AuctionRoundEvent, EventPayload};
use crate::oracle::PriceOracle;
use crate::types::SubaccountId;
use rust_decimal::Decimal;
use tracing::{debug, info};

impl<O: PriceOracle> Engine<O> {
    /// Bid on the running round. The bid is held until outbid or the round closes.
    pub fn place_bid(&mut self, bidder: SubaccountId, round: u64, amount: Decimal) -> Result<(), EngineError> {
        self.transact(|e| {
            let params = e.config.params.auction.clone();
            let replaced = e.ledger.auction.place_bid(bidder, round, amount, &params)?;
            e.ledger.balances.debit(bidder, &params.bid_denom, amount)?;
            if let Some(previous) = replaced {
                e.ledger.balances.credit(previous.bidder, &params.bid_denom, previous.amount);
            }

            debug!(round, bidder = %bidder, %amount, "auction bid");
            e.emit(EventPayload::AuctionBid(AuctionBidEvent { round, bidder, amount }));
            Ok(())
        })
    }

    // 14.3: close the round once its time is up. the winning bid is burned
    pub(super) fn close_auction_round(&mut self) -> Result<Option<RoundResult>, EngineError> {
        let now = self.block.time;
        if !self.ledger.auction.is_due(now) {
            return Ok(None);
        }
        let params = self.config.params.auction.clone();
        let result = self
            .ledger
            .auction
            .close_round(&mut self.ledger.fee_pool, now, &params);

        let mut amount_burned = Decimal::ZERO;
        if let Some(winner) = result.winner {
            for (denom, amount) in &result.basket {
                self.ledger.balances.credit(winner.bidder, denom, *amount);
            }
            *self.ledger.burned.entry_or_default(params.bid_denom.clone()) += winner.amount;
            amount_burned = winner.amount;
        }

        info!(round = result.round, burned = %amount_burned, next_round = self.ledger.auction.round, "auction round closed");
        self.emit(EventPayload::AuctionRoundSettled(AuctionRoundEvent {
            round: result.round,
            winner: result.winner.map(|w| w.bidder),
            amount_burned,
            basket: result.basket.clone(),
        }));
        Ok(Some(result))
    }
}
