// 8.5 engine/blocks.rs: the per-block driver. begin block fixes the clock and
// the mark prices the block trades against; end block runs the periodic work
// in a fixed order so every node reaches the same state.

use super::core::Engine;
use super::orders::OrderRequest;
use super::results::{BeginBlockReport, BlockReport, EngineError};
use crate::events::{CancelReason, ConditionalTriggeredEvent, EventPayload, OrderCancelledEvent};
use crate::market::MarketStatus;
use crate::oracle::PriceOracle;
use crate::order::Order;
use crate::types::{BlockInfo, MarketId};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl<O: PriceOracle> Engine<O> {
    /// Open a new block. Time may stand still but never run backwards.
    pub fn begin_block(&mut self, block: BlockInfo) -> Result<BeginBlockReport, EngineError> {
        if block.time < self.block.time {
            return Err(EngineError::NonMonotonicBlock {
                previous: self.block.time,
                next: block.time,
            });
        }
        self.transact(|e| {
            e.block = block;
            let mut report = BeginBlockReport {
                height: block.height,
                ..Default::default()
            };
            e.snapshot_mark_prices();
            report.activated_markets = e.activate_pending_markets()?;

            let markets: Vec<MarketId> = e
                .ledger
                .markets
                .values()
                .filter(|m| m.is_active() && m.market_type.is_derivative())
                .map(|m| m.id)
                .collect();
            for market_id in markets {
                e.trigger_conditional_orders(market_id, &mut report)?;
            }

            debug!(
                height = block.height,
                activated = report.activated_markets.len(),
                triggered = report.triggered_orders.len(),
                "block opened"
            );
            Ok(report)
        })
    }

    /// Close the block: batch auctions, funding, liquidations, expiries,
    /// insurance redemptions and the burn auction, in that order.
    pub fn end_block(&mut self) -> Result<BlockReport, EngineError> {
        self.transact(|e| {
            let mut report = BlockReport {
                height: e.block.height,
                ..Default::default()
            };

            let batched: Vec<MarketId> = e
                .ledger
                .markets
                .values()
                .filter(|m| m.is_active() && m.market_type.is_derivative())
                .map(|m| m.id)
                .collect();
            for market_id in batched {
                report.fills.extend(e.run_batch_auction(market_id)?);
            }

            report.funding = e.process_funding()?;
            e.run_liquidation_sweep(&mut report)?;
            report.settled_markets = e.process_expiries()?;
            report.redemptions_paid = e.pay_matured_redemptions()?;
            report.auction = e.close_auction_round()?;
            e.ledger.balances.prune_empty();

            info!(
                height = report.height,
                fills = report.fills.len(),
                liquidations = report.liquidations.len(),
                settled = report.settled_markets.len(),
                "block closed"
            );
            Ok(report)
        })
    }

    // 13.2: the mark every check in this block reads until the book moves
    fn snapshot_mark_prices(&mut self) {
        let marks: Vec<(MarketId, Option<Decimal>)> = self
            .ledger
            .markets
            .values()
            .map(|m| (m.id, self.live_mark_price(m)))
            .collect();
        for (market_id, mark) in marks {
            if let Some(market) = self.ledger.markets.get_mut(&market_id) {
                market.mark_price_snapshot = mark;
            }
        }
    }

    /// Derivative markets launched before their oracle reported go live once it does.
    fn activate_pending_markets(&mut self) -> Result<Vec<MarketId>, EngineError> {
        let pending: Vec<MarketId> = self
            .ledger
            .markets
            .values()
            .filter(|m| m.status == MarketStatus::Unspecified)
            .filter(|m| !m.market_type.is_derivative() || self.oracle_price(m).is_some())
            .map(|m| m.id)
            .collect();
        for market_id in &pending {
            self.change_status(*market_id, MarketStatus::Active)?;
        }
        Ok(pending)
    }

    // 2.4: fire conditional orders the snapshot mark has reached, oldest first.
    // a triggered order keeps its hash and is placed as if newly submitted
    fn trigger_conditional_orders(&mut self, market_id: MarketId, report: &mut BeginBlockReport) -> Result<(), EngineError> {
        let Some(mark) = self.market_ref(market_id)?.mark_price_snapshot else {
            return Ok(());
        };
        let due = self
            .ledger
            .conditional
            .get(&market_id)
            .map(|c| c.triggered(mark))
            .unwrap_or_default();

        for hash in due {
            let Some(order) = self.ledger.conditional.get_mut(&market_id).and_then(|c| c.remove(&hash)) else {
                continue;
            };
            let market = self.market_ref(market_id)?.clone();
            self.release_escrow(&market, &order)?;
            self.emit(EventPayload::ConditionalTriggered(ConditionalTriggeredEvent {
                market_id,
                order_hash: hash,
                mark_price: mark,
            }));

            let request = triggered_request(&order);
            match self.attempt(|e| e.submit_order(request, hash)) {
                Ok(_) => report.triggered_orders.push(hash),
                Err(err) => {
                    warn!(market = %market_id, order = %hash, error = %err, "triggered order rejected");
                    self.emit(EventPayload::OrderCancelled(OrderCancelledEvent {
                        market_id,
                        order_hash: hash,
                        subaccount_id: order.subaccount_id,
                        reason: CancelReason::TriggerFailed,
                    }));
                    report.failed_triggers.push(hash);
                }
            }
        }
        Ok(())
    }
}

fn triggered_request(order: &Order) -> OrderRequest {
    OrderRequest {
        market_id: order.market_id,
        subaccount_id: order.subaccount_id,
        side: order.side,
        price: order.price.value(),
        quantity: order.fillable,
        order_type: order.order_type,
        reduce_only: order.reduce_only,
        trigger: None,
        margin: (!order.reduce_only).then_some(order.margin),
        fee_recipient: order.fee_recipient,
    }
}
