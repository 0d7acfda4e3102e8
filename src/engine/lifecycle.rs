//! Market lifecycle: launches, instant listings, parameter updates and status changes.

use super::core::Engine;
use super::results::{EngineError, SettlementResult};
use crate::conditional::ConditionalOrderBook;
use crate::events::{EventPayload, MarketLaunchedEvent, MarketStatusChangedEvent};
use crate::funding::FundingState;
use crate::insurance::InsuranceError;
use crate::margin::MarginRatios;
use crate::market::{
    derivative_market_id, spot_market_id, ExpiryInfo, Market, MarketError, MarketStatus, MarketType, PerpetualInfo,
    SettlementPrice,
};
use crate::oracle::PriceOracle;
use crate::order::OrderBook;
use crate::proposal::{
    BinaryOptionsMarketLaunch, BinaryOptionsParamUpdate, DerivativeMarketLaunch, DerivativeParamUpdate,
    FeeAndTickUpdate, Proposal, ProposalError, SpotMarketLaunch, SpotParamUpdate,
};
use crate::types::{MarketId, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use tracing::info;

/// What an executed proposal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    MarketLaunched(MarketId),
    MarketUpdated(MarketId),
    MarketSettled(SettlementResult),
    FeeDiscountScheduleSet,
    TradingRewardCampaignSet,
}

impl<O: PriceOracle> Engine<O> {
    /// Execute a passed governance proposal.
    pub fn submit_proposal(&mut self, proposal: Proposal) -> Result<ProposalOutcome, EngineError> {
        proposal.validate_basic()?;
        info!(title = proposal.title(), "executing proposal");
        self.transact(|e| e.execute_proposal(proposal))
    }

    /// Permissionless spot listing.
    pub fn instant_spot_market_launch(&mut self, sender: SubaccountId, launch: SpotMarketLaunch) -> Result<MarketId, EngineError> {
        launch.validate_basic()?;
        self.transact(|e| e.launch_spot_market(launch, Some(sender)))
    }

    /// Permissionless perpetual listing. The insurance fund must already exist.
    pub fn instant_perpetual_market_launch(
        &mut self,
        sender: SubaccountId,
        launch: DerivativeMarketLaunch,
    ) -> Result<MarketId, EngineError> {
        launch.validate_basic()?;
        self.transact(|e| e.launch_derivative_market(launch, MarketType::Perpetual, None, Some(sender)))
    }

    fn execute_proposal(&mut self, proposal: Proposal) -> Result<ProposalOutcome, EngineError> {
        match proposal {
            Proposal::SpotMarketLaunch(launch) => self.launch_spot_market(launch, None).map(ProposalOutcome::MarketLaunched),
            Proposal::PerpetualMarketLaunch(launch) => self
                .launch_derivative_market(launch, MarketType::Perpetual, None, None)
                .map(ProposalOutcome::MarketLaunched),
            Proposal::ExpiryFuturesMarketLaunch(launch) => self
                .launch_derivative_market(launch.market, MarketType::ExpiryFutures, Some(launch.expiry), None)
                .map(ProposalOutcome::MarketLaunched),
            Proposal::BinaryOptionsMarketLaunch(launch) => {
                self.launch_binary_options_market(launch).map(ProposalOutcome::MarketLaunched)
            }
            Proposal::SpotParamUpdate(update) => self.update_spot_market(update),
            Proposal::DerivativeParamUpdate(update) => self.update_derivative_market(update),
            Proposal::BinaryOptionsParamUpdate(update) => self.update_binary_options_market(update),
            Proposal::ForcedSettlement(settlement) => self
                .force_settle(settlement.market_id, settlement.settlement_price)
                .map(ProposalOutcome::MarketSettled),
            Proposal::FeeDiscount(schedule) => {
                self.ledger.fee_discounts = Some(schedule);
                self.emit(EventPayload::FeeDiscountScheduleSet);
                Ok(ProposalOutcome::FeeDiscountScheduleSet)
            }
            Proposal::TradingRewardCampaign(campaign) => {
                self.ledger.campaign = Some(campaign);
                self.emit(EventPayload::TradingRewardCampaignSet);
                Ok(ProposalOutcome::TradingRewardCampaignSet)
            }
        }
    }

    // 12.5: launches
    fn launch_spot_market(&mut self, launch: SpotMarketLaunch, listed_by: Option<SubaccountId>) -> Result<MarketId, EngineError> {
        let fees = &self.config.params.fees;
        let market = Market {
            id: spot_market_id(&launch.base_denom, &launch.quote_denom),
            ticker: launch.ticker,
            market_type: MarketType::Spot,
            base_denom: Some(launch.base_denom),
            quote_denom: launch.quote_denom,
            oracle: None,
            min_price_tick_size: launch.min_price_tick_size,
            min_quantity_tick_size: launch.min_quantity_tick_size,
            maker_fee_rate: launch.maker_fee_rate.unwrap_or(fees.spot_maker_fee_rate),
            taker_fee_rate: launch.taker_fee_rate.unwrap_or(fees.spot_taker_fee_rate),
            relayer_fee_share_rate: fees.relayer_fee_share_rate,
            margin: None,
            perpetual: None,
            expiry: None,
            settlement_scale: None,
            status: MarketStatus::Unspecified,
            mark_price_snapshot: None,
            last_trade_price: None,
            open_interest: Decimal::ZERO,
            volume: Decimal::ZERO,
            launched_at: self.block.time,
        };
        self.install_market(market, listed_by)
    }

    fn launch_derivative_market(
        &mut self,
        launch: DerivativeMarketLaunch,
        market_type: MarketType,
        expiry: Option<Timestamp>,
        listed_by: Option<SubaccountId>,
    ) -> Result<MarketId, EngineError> {
        let now = self.block.time;
        let id = derivative_market_id(market_type, &launch.ticker, &launch.quote_denom, &launch.oracle, expiry);
        if !self.ledger.insurance_funds.contains_key(&id) {
            return Err(InsuranceError::NotFound(id).into());
        }
        if let Some(expiry) = expiry {
            if expiry <= now {
                return Err(ProposalError::TimestampInPast(expiry).into());
            }
        }

        let params = &self.config.params;
        let margin = MarginRatios::new(
            launch.initial_margin_ratio.unwrap_or(params.margin.initial),
            launch.maintenance_margin_ratio.unwrap_or(params.margin.maintenance),
        );
        if !margin.is_valid() {
            return Err(ProposalError::InitialBelowMaintenance {
                initial: margin.initial,
                maintenance: margin.maintenance,
            }
            .into());
        }
        let perpetual = (market_type == MarketType::Perpetual).then(|| PerpetualInfo {
            params: params.funding,
            state: FundingState::new(now, params.funding.interval),
        });

        let market = Market {
            id,
            ticker: launch.ticker,
            market_type,
            base_denom: None,
            quote_denom: launch.quote_denom,
            oracle: Some(launch.oracle),
            min_price_tick_size: launch.min_price_tick_size,
            min_quantity_tick_size: launch.min_quantity_tick_size,
            maker_fee_rate: launch.maker_fee_rate.unwrap_or(params.fees.derivative_maker_fee_rate),
            taker_fee_rate: launch.taker_fee_rate.unwrap_or(params.fees.derivative_taker_fee_rate),
            relayer_fee_share_rate: params.fees.relayer_fee_share_rate,
            margin: Some(margin),
            perpetual,
            expiry: expiry.map(|expiration_timestamp| ExpiryInfo {
                expiration_timestamp,
                settlement_timestamp: None,
                settlement_price: None,
            }),
            settlement_scale: None,
            status: MarketStatus::Unspecified,
            mark_price_snapshot: None,
            last_trade_price: None,
            open_interest: Decimal::ZERO,
            volume: Decimal::ZERO,
            launched_at: now,
        };
        self.install_market(market, listed_by)
    }

    fn launch_binary_options_market(&mut self, launch: BinaryOptionsMarketLaunch) -> Result<MarketId, EngineError> {
        let now = self.block.time;
        for timestamp in [launch.expiration_timestamp, launch.settlement_timestamp] {
            if timestamp <= now {
                return Err(ProposalError::TimestampInPast(timestamp).into());
            }
        }
        let fees = &self.config.params.fees;
        let market = Market {
            id: derivative_market_id(
                MarketType::BinaryOptions,
                &launch.ticker,
                &launch.quote_denom,
                &launch.oracle,
                Some(launch.expiration_timestamp),
            ),
            ticker: launch.ticker,
            market_type: MarketType::BinaryOptions,
            base_denom: None,
            quote_denom: launch.quote_denom,
            oracle: Some(launch.oracle),
            min_price_tick_size: launch.min_price_tick_size,
            min_quantity_tick_size: launch.min_quantity_tick_size,
            maker_fee_rate: launch.maker_fee_rate.unwrap_or(fees.derivative_maker_fee_rate),
            taker_fee_rate: launch.taker_fee_rate.unwrap_or(fees.derivative_taker_fee_rate),
            relayer_fee_share_rate: fees.relayer_fee_share_rate,
            margin: None,
            perpetual: None,
            expiry: Some(ExpiryInfo {
                expiration_timestamp: launch.expiration_timestamp,
                settlement_timestamp: Some(launch.settlement_timestamp),
                settlement_price: None,
            }),
            settlement_scale: Some(launch.settlement_scale),
            status: MarketStatus::Unspecified,
            mark_price_snapshot: None,
            last_trade_price: None,
            open_interest: Decimal::ZERO,
            volume: Decimal::ZERO,
            launched_at: now,
        };
        self.install_market(market, None)
    }

    /// Registers a new market with empty books. Spot markets and markets whose
    /// oracle already reports go live at once; the rest wait for begin block.
    fn install_market(&mut self, market: Market, listed_by: Option<SubaccountId>) -> Result<MarketId, EngineError> {
        let id = market.id;
        if self.ledger.markets.contains_key(&id) {
            return Err(MarketError::AlreadyExists(id).into());
        }
        if !market.fees_are_consistent() {
            return Err(ProposalError::InvalidFees {
                maker: market.maker_fee_rate,
                taker: market.taker_fee_rate,
            }
            .into());
        }
        let goes_live = market.market_type == MarketType::Spot || self.oracle_price(&market).is_some();

        info!(market = %id, ticker = %market.ticker, market_type = ?market.market_type, "market launched");
        self.emit(EventPayload::MarketLaunched(MarketLaunchedEvent {
            market_id: id,
            ticker: market.ticker.clone(),
            market_type: market.market_type,
            listed_by,
        }));
        self.ledger.books.insert(id, OrderBook::new(id));
        self.ledger.conditional.insert(id, ConditionalOrderBook::new(id));
        self.ledger.markets.insert(id, market);

        if goes_live {
            self.change_status(id, MarketStatus::Active)?;
        }
        Ok(id)
    }

    // 12.6: parameter updates
    fn update_spot_market(&mut self, proposal: SpotParamUpdate) -> Result<ProposalOutcome, EngineError> {
        let market = self.market_of_type(proposal.market_id, &[MarketType::Spot])?;
        apply_fee_and_tick(market, &proposal.update)?;
        self.finish_update(proposal.market_id, proposal.update.status, None)
    }

    fn update_derivative_market(&mut self, proposal: DerivativeParamUpdate) -> Result<ProposalOutcome, EngineError> {
        let market_id = proposal.market_id;
        let market = self.market_of_type(market_id, &[MarketType::Perpetual, MarketType::ExpiryFutures])?;
        apply_fee_and_tick(market, &proposal.update)?;

        if let Some(current) = market.margin {
            let ratios = MarginRatios::new(
                proposal.initial_margin_ratio.unwrap_or(current.initial),
                proposal.maintenance_margin_ratio.unwrap_or(current.maintenance),
            );
            if !ratios.is_valid() {
                return Err(ProposalError::InitialBelowMaintenance {
                    initial: ratios.initial,
                    maintenance: ratios.maintenance,
                }
                .into());
            }
            market.margin = Some(ratios);
        }

        if let Some(perpetual) = market.perpetual.as_mut() {
            if let Some(interest) = proposal.hourly_interest_rate {
                perpetual.params.hourly_interest_rate = interest;
            }
            if let Some(cap) = proposal.hourly_funding_rate_cap {
                perpetual.params.hourly_funding_rate_cap = cap;
            }
            if !perpetual.params.is_valid() {
                return Err(ProposalError::InvalidFunding {
                    interest: perpetual.params.hourly_interest_rate,
                    cap: perpetual.params.hourly_funding_rate_cap,
                }
                .into());
            }
        } else if proposal.hourly_interest_rate.is_some() || proposal.hourly_funding_rate_cap.is_some() {
            return Err(ProposalError::WrongMarketType(market_id).into());
        }

        if let Some(oracle) = proposal.oracle {
            market.oracle = Some(oracle);
        }
        self.finish_update(market_id, proposal.update.status, None)
    }

    fn update_binary_options_market(&mut self, proposal: BinaryOptionsParamUpdate) -> Result<ProposalOutcome, EngineError> {
        let market_id = proposal.market_id;
        let now = self.block.time;
        let market = self.market_of_type(market_id, &[MarketType::BinaryOptions])?;
        apply_fee_and_tick(market, &proposal.update)?;

        let scale = market.settlement_scale.unwrap_or(Decimal::ONE);
        if let Some(SettlementPrice::Price(price)) = proposal.settlement_price {
            if price > scale {
                return Err(MarketError::PriceOutOfRange { price, max: scale }.into());
            }
        }
        if let Some(expiry) = market.expiry.as_mut() {
            if let Some(expiration) = proposal.expiration_timestamp {
                if expiration <= now {
                    return Err(ProposalError::TimestampInPast(expiration).into());
                }
                expiry.expiration_timestamp = expiration;
            }
            if let Some(settlement) = proposal.settlement_timestamp {
                if settlement <= now {
                    return Err(ProposalError::TimestampInPast(settlement).into());
                }
                expiry.settlement_timestamp = Some(settlement);
            }
            let settlement = expiry.settlement_timestamp.unwrap_or(expiry.expiration_timestamp);
            if expiry.expiration_timestamp >= settlement {
                return Err(ProposalError::ExpirationAfterSettlement {
                    expiration: expiry.expiration_timestamp,
                    settlement,
                }
                .into());
            }
        }
        if let Some(oracle) = proposal.oracle {
            market.oracle = Some(oracle);
        }
        self.finish_update(market_id, proposal.update.status, proposal.settlement_price)
    }

    /// Emits the update, then applies any status change. Demolishing settles the market.
    fn finish_update(
        &mut self,
        market_id: MarketId,
        status: Option<MarketStatus>,
        settlement_price: Option<SettlementPrice>,
    ) -> Result<ProposalOutcome, EngineError> {
        if !self.market_ref(market_id)?.fees_are_consistent() {
            let market = self.market_ref(market_id)?;
            return Err(ProposalError::InvalidFees {
                maker: market.maker_fee_rate,
                taker: market.taker_fee_rate,
            }
            .into());
        }
        self.emit(EventPayload::MarketParamsUpdated(market_id));

        match status {
            Some(MarketStatus::Demolished) => {
                let result = match settlement_price {
                    Some(price) => self.settle_market(market_id, price, MarketStatus::Demolished)?,
                    None => self.force_settle(market_id, None)?,
                };
                Ok(ProposalOutcome::MarketSettled(result))
            }
            Some(next) => {
                self.change_status(market_id, next)?;
                Ok(ProposalOutcome::MarketUpdated(market_id))
            }
            None => Ok(ProposalOutcome::MarketUpdated(market_id)),
        }
    }

    fn market_of_type(&mut self, market_id: MarketId, allowed: &[MarketType]) -> Result<&mut Market, EngineError> {
        let market = self.market_mut(market_id)?;
        if !allowed.contains(&market.market_type) {
            return Err(ProposalError::WrongMarketType(market_id).into());
        }
        if market.status.is_settled() {
            return Err(MarketError::NotActive {
                market_id,
                status: market.status,
            }
            .into());
        }
        Ok(market)
    }

    // 12.4: status change plus its event
    pub(super) fn change_status(&mut self, market_id: MarketId, next: MarketStatus) -> Result<(), EngineError> {
        let previous = self.market_mut(market_id)?.transition(next)?;
        if previous != next {
            info!(market = %market_id, from = ?previous, to = ?next, "market status changed");
            self.emit(EventPayload::MarketStatusChanged(MarketStatusChangedEvent {
                market_id,
                from: previous,
                to: next,
            }));
        }
        Ok(())
    }
}

fn apply_fee_and_tick(market: &mut Market, update: &FeeAndTickUpdate) -> Result<(), EngineError> {
    if let Some(rate) = update.maker_fee_rate {
        market.maker_fee_rate = rate;
    }
    if let Some(rate) = update.taker_fee_rate {
        market.taker_fee_rate = rate;
    }
    if let Some(share) = update.relayer_fee_share_rate {
        market.relayer_fee_share_rate = share;
    }
    if let Some(tick) = update.min_price_tick_size {
        market.min_price_tick_size = tick;
    }
    if let Some(tick) = update.min_quantity_tick_size {
        market.min_quantity_tick_size = tick;
    }
    Ok(())
}
