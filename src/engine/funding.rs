//! Funding accrual for perpetual markets.

use super::core::Engine;
use super::results::{EngineError, FundingResult};
use crate::events::{EventPayload, FundingUpdatedEvent};
use crate::funding::{accrue_premium, apply_funding_if_due};
use crate::market::MarketType;
use crate::oracle::PriceOracle;
use crate::types::MarketId;
use tracing::{debug, warn};

impl<O: PriceOracle> Engine<O> {
    /// End-block funding pass. Positions pick up the new index lazily.
    pub(super) fn process_funding(&mut self) -> Result<Vec<FundingResult>, EngineError> {
        let perpetuals: Vec<MarketId> = self
            .ledger
            .markets
            .values()
            .filter(|m| m.market_type == MarketType::Perpetual && m.is_active())
            .map(|m| m.id)
            .collect();

        let mut results = Vec::new();
        for market_id in perpetuals {
            if let Some(result) = self.update_funding(market_id)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn update_funding(&mut self, market_id: MarketId) -> Result<Option<FundingResult>, EngineError> {
        let now = self.block.time;
        let market = self.market_ref(market_id)?;
        let (Some(oracle), Some(mark)) = (self.oracle_price(market), self.live_mark_price(market)) else {
            warn!(market = %market_id, "no oracle price, funding not accrued");
            return Ok(None);
        };

        let market = self.market_mut(market_id)?;
        let Some(perpetual) = market.perpetual.as_mut() else {
            return Ok(None);
        };
        accrue_premium(&mut perpetual.state, mark, oracle, now);
        let Some(payment) = apply_funding_if_due(&mut perpetual.state, &perpetual.params, oracle, now) else {
            return Ok(None);
        };

        debug!(
            market = %market_id,
            rate = %payment.rate,
            cumulative = %payment.cumulative_funding,
            "funding applied"
        );
        self.emit(EventPayload::FundingUpdated(FundingUpdatedEvent {
            market_id,
            rate: payment.rate,
            cumulative_funding: payment.cumulative_funding,
        }));
        Ok(Some(FundingResult {
            market_id,
            rate: payment.rate,
            cumulative_funding: payment.cumulative_funding,
            timestamp: payment.timestamp,
        }))
    }
}
