//! Governance proposals and instant-listing messages.
//!
//! Every administrative change to the exchange arrives as one `Proposal`
//! variant. `validate_basic` checks what can be checked without state; the
//! engine applies the proposal transactionally against the ledger.

use crate::fees::{FeeDiscountSchedule, TradingRewardCampaign};
use crate::market::{fee_rates_are_consistent, MarketStatus, OracleParams, SettlementPrice};
use crate::types::{Denom, MarketId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const MAX_TICKER_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotMarketLaunch {
    pub ticker: String,
    pub base_denom: Denom,
    pub quote_denom: Denom,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    /// falls back to the exchange defaults when unset
    pub maker_fee_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeMarketLaunch {
    pub ticker: String,
    pub quote_denom: Denom,
    pub oracle: OracleParams,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    pub initial_margin_ratio: Option<Decimal>,
    pub maintenance_margin_ratio: Option<Decimal>,
    pub maker_fee_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryFuturesMarketLaunch {
    pub market: DerivativeMarketLaunch,
    pub expiry: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryOptionsMarketLaunch {
    pub ticker: String,
    pub quote_denom: Denom,
    pub oracle: OracleParams,
    pub expiration_timestamp: Timestamp,
    pub settlement_timestamp: Timestamp,
    /// prices live in (0, scale)
    pub settlement_scale: Decimal,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    pub maker_fee_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
}

/// Fields common to every parameter update. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAndTickUpdate {
    pub maker_fee_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
    pub relayer_fee_share_rate: Option<Decimal>,
    pub min_price_tick_size: Option<Decimal>,
    pub min_quantity_tick_size: Option<Decimal>,
    pub status: Option<MarketStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotParamUpdate {
    pub market_id: MarketId,
    pub update: FeeAndTickUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeParamUpdate {
    pub market_id: MarketId,
    pub update: FeeAndTickUpdate,
    pub initial_margin_ratio: Option<Decimal>,
    pub maintenance_margin_ratio: Option<Decimal>,
    pub hourly_interest_rate: Option<Decimal>,
    pub hourly_funding_rate_cap: Option<Decimal>,
    pub oracle: Option<OracleParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryOptionsParamUpdate {
    pub market_id: MarketId,
    pub update: FeeAndTickUpdate,
    pub expiration_timestamp: Option<Timestamp>,
    pub settlement_timestamp: Option<Timestamp>,
    pub settlement_price: Option<SettlementPrice>,
    pub oracle: Option<OracleParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedSettlement {
    pub market_id: MarketId,
    /// oracle price when unset (entry-price refund for binary options)
    pub settlement_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    SpotMarketLaunch(SpotMarketLaunch),
    PerpetualMarketLaunch(DerivativeMarketLaunch),
    ExpiryFuturesMarketLaunch(ExpiryFuturesMarketLaunch),
    BinaryOptionsMarketLaunch(BinaryOptionsMarketLaunch),
    SpotParamUpdate(SpotParamUpdate),
    DerivativeParamUpdate(DerivativeParamUpdate),
    BinaryOptionsParamUpdate(BinaryOptionsParamUpdate),
    ForcedSettlement(ForcedSettlement),
    FeeDiscount(FeeDiscountSchedule),
    TradingRewardCampaign(TradingRewardCampaign),
}

impl Proposal {
    pub fn title(&self) -> &'static str {
        match self {
            Proposal::SpotMarketLaunch(_) => "spot market launch",
            Proposal::PerpetualMarketLaunch(_) => "perpetual market launch",
            Proposal::ExpiryFuturesMarketLaunch(_) => "expiry futures market launch",
            Proposal::BinaryOptionsMarketLaunch(_) => "binary options market launch",
            Proposal::SpotParamUpdate(_) => "spot market param update",
            Proposal::DerivativeParamUpdate(_) => "derivative market param update",
            Proposal::BinaryOptionsParamUpdate(_) => "binary options market param update",
            Proposal::ForcedSettlement(_) => "market forced settlement",
            Proposal::FeeDiscount(_) => "fee discount",
            Proposal::TradingRewardCampaign(_) => "trading reward campaign",
        }
    }

    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        match self {
            Proposal::SpotMarketLaunch(p) => p.validate_basic(),
            Proposal::PerpetualMarketLaunch(p) => p.validate_basic(),
            Proposal::ExpiryFuturesMarketLaunch(p) => p.market.validate_basic(),
            Proposal::BinaryOptionsMarketLaunch(p) => p.validate_basic(),
            Proposal::SpotParamUpdate(p) => p.update.validate_basic(),
            Proposal::DerivativeParamUpdate(p) => p.validate_basic(),
            Proposal::BinaryOptionsParamUpdate(p) => p.validate_basic(),
            Proposal::ForcedSettlement(p) => match p.settlement_price {
                Some(price) if price <= Decimal::ZERO => Err(ProposalError::InvalidSettlementPrice(price)),
                _ => Ok(()),
            },
            Proposal::FeeDiscount(schedule) => schedule.validate().map_err(ProposalError::InvalidFeeDiscount),
            Proposal::TradingRewardCampaign(campaign) => campaign.validate().map_err(ProposalError::InvalidCampaign),
        }
    }
}

fn validate_ticker(ticker: &str) -> Result<(), ProposalError> {
    if ticker.trim().is_empty() || ticker.len() > MAX_TICKER_LEN {
        return Err(ProposalError::InvalidTicker(ticker.to_string()));
    }
    Ok(())
}

fn validate_tick(tick: Decimal) -> Result<(), ProposalError> {
    if tick <= Decimal::ZERO {
        return Err(ProposalError::InvalidTickSize(tick));
    }
    Ok(())
}

fn validate_fee_rates(maker: Option<Decimal>, taker: Option<Decimal>) -> Result<(), ProposalError> {
    // the relayer share is only known against state; check the bound at share zero here
    if let (Some(maker), Some(taker)) = (maker, taker) {
        if !fee_rates_are_consistent(maker, taker, Decimal::ZERO) {
            return Err(ProposalError::InvalidFees { maker, taker });
        }
    }
    for rate in [maker, taker].into_iter().flatten() {
        if rate.abs() >= Decimal::ONE {
            return Err(ProposalError::InvalidFees {
                maker: maker.unwrap_or_default(),
                taker: taker.unwrap_or_default(),
            });
        }
    }
    Ok(())
}

fn validate_margin(initial: Option<Decimal>, maintenance: Option<Decimal>) -> Result<(), ProposalError> {
    for ratio in [initial, maintenance].into_iter().flatten() {
        if ratio <= Decimal::ZERO || ratio >= Decimal::ONE {
            return Err(ProposalError::InvalidMarginRatio(ratio));
        }
    }
    if let (Some(initial), Some(maintenance)) = (initial, maintenance) {
        if initial <= maintenance {
            return Err(ProposalError::InitialBelowMaintenance { initial, maintenance });
        }
    }
    Ok(())
}

fn validate_oracle(oracle: &OracleParams) -> Result<(), ProposalError> {
    if oracle.base.is_empty() || oracle.quote.is_empty() || oracle.base == oracle.quote {
        return Err(ProposalError::InvalidOracle);
    }
    Ok(())
}

impl SpotMarketLaunch {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        validate_ticker(&self.ticker)?;
        if self.base_denom == self.quote_denom {
            return Err(ProposalError::SameDenoms(self.base_denom.clone()));
        }
        validate_tick(self.min_price_tick_size)?;
        validate_tick(self.min_quantity_tick_size)?;
        validate_fee_rates(self.maker_fee_rate, self.taker_fee_rate)
    }
}

impl DerivativeMarketLaunch {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        validate_ticker(&self.ticker)?;
        validate_oracle(&self.oracle)?;
        validate_tick(self.min_price_tick_size)?;
        validate_tick(self.min_quantity_tick_size)?;
        validate_fee_rates(self.maker_fee_rate, self.taker_fee_rate)?;
        validate_margin(self.initial_margin_ratio, self.maintenance_margin_ratio)
    }
}

impl BinaryOptionsMarketLaunch {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        validate_ticker(&self.ticker)?;
        validate_oracle(&self.oracle)?;
        validate_tick(self.min_price_tick_size)?;
        validate_tick(self.min_quantity_tick_size)?;
        validate_fee_rates(self.maker_fee_rate, self.taker_fee_rate)?;
        if self.settlement_scale <= Decimal::ZERO {
            return Err(ProposalError::InvalidScale(self.settlement_scale));
        }
        if self.expiration_timestamp >= self.settlement_timestamp {
            return Err(ProposalError::ExpirationAfterSettlement {
                expiration: self.expiration_timestamp,
                settlement: self.settlement_timestamp,
            });
        }
        Ok(())
    }
}

impl FeeAndTickUpdate {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        for tick in [self.min_price_tick_size, self.min_quantity_tick_size].into_iter().flatten() {
            validate_tick(tick)?;
        }
        validate_fee_rates(self.maker_fee_rate, self.taker_fee_rate)?;
        if let Some(share) = self.relayer_fee_share_rate {
            if share < Decimal::ZERO || share > Decimal::ONE {
                return Err(ProposalError::InvalidRelayerShare(share));
            }
        }
        match self.status {
            None | Some(MarketStatus::Active) | Some(MarketStatus::Paused) | Some(MarketStatus::Demolished) => Ok(()),
            Some(other) => Err(ProposalError::InvalidStatus(other)),
        }
    }
}

impl DerivativeParamUpdate {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        self.update.validate_basic()?;
        validate_margin(self.initial_margin_ratio, self.maintenance_margin_ratio)?;
        if let Some(oracle) = &self.oracle {
            validate_oracle(oracle)?;
        }
        if let (Some(interest), Some(cap)) = (self.hourly_interest_rate, self.hourly_funding_rate_cap) {
            if cap < Decimal::ZERO || interest.abs() > cap {
                return Err(ProposalError::InvalidFunding { interest, cap });
            }
        }
        Ok(())
    }
}

impl BinaryOptionsParamUpdate {
    pub fn validate_basic(&self) -> Result<(), ProposalError> {
        self.update.validate_basic()?;
        if let Some(oracle) = &self.oracle {
            validate_oracle(oracle)?;
        }
        if let (Some(expiration), Some(settlement)) = (self.expiration_timestamp, self.settlement_timestamp) {
            if expiration >= settlement {
                return Err(ProposalError::ExpirationAfterSettlement { expiration, settlement });
            }
        }
        if self.settlement_price.is_some() && self.update.status != Some(MarketStatus::Demolished) {
            return Err(ProposalError::SettlementPriceWithoutDemolish);
        }
        if let Some(SettlementPrice::Price(price)) = self.settlement_price {
            if price < Decimal::ZERO {
                return Err(ProposalError::InvalidSettlementPrice(price));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalError {
    #[error("Invalid ticker {0:?}")]
    InvalidTicker(String),

    #[error("Tick size must be positive, got {0}")]
    InvalidTickSize(Decimal),

    #[error("Base and quote are both {0}")]
    SameDenoms(Denom),

    #[error("Inconsistent fee rates: maker {maker}, taker {taker}")]
    InvalidFees { maker: Decimal, taker: Decimal },

    #[error("Relayer fee share {0} outside [0, 1]")]
    InvalidRelayerShare(Decimal),

    #[error("Margin ratio {0} outside (0, 1)")]
    InvalidMarginRatio(Decimal),

    #[error("Initial margin ratio {initial} must exceed maintenance {maintenance}")]
    InitialBelowMaintenance { initial: Decimal, maintenance: Decimal },

    #[error("Funding interest {interest} exceeds cap {cap}")]
    InvalidFunding { interest: Decimal, cap: Decimal },

    #[error("Oracle base and quote must be set and differ")]
    InvalidOracle,

    #[error("Settlement scale must be positive, got {0}")]
    InvalidScale(Decimal),

    #[error("Expiration {expiration} must precede settlement {settlement}")]
    ExpirationAfterSettlement { expiration: Timestamp, settlement: Timestamp },

    #[error("Timestamp {0} is already in the past")]
    TimestampInPast(Timestamp),

    #[error("A settlement price can only be set when demolishing the market")]
    SettlementPriceWithoutDemolish,

    #[error("Invalid settlement price {0}")]
    InvalidSettlementPrice(Decimal),

    #[error("Proposals cannot move a market to {0:?}")]
    InvalidStatus(MarketStatus),

    #[error("Invalid fee discount schedule: {0}")]
    InvalidFeeDiscount(String),

    #[error("Invalid trading reward campaign: {0}")]
    InvalidCampaign(String),

    #[error("Market {0} has the wrong type for this proposal")]
    WrongMarketType(MarketId),
}
