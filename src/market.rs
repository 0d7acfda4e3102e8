//! Market definitions and lifecycle.
//!
//! A market is one tradable instrument: spot pair, perpetual, expiry future
//! or binary option. Markets are never deleted. They move through
//! `MarketStatus` until they reach `Demolished`.

use crate::funding::{FundingParams, FundingState};
use crate::margin::MarginRatios;
use crate::types::{is_tick_aligned, Denom, MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Spot,
    Perpetual,
    ExpiryFutures,
    BinaryOptions,
}

impl MarketType {
    pub fn is_derivative(&self) -> bool {
        !matches!(self, MarketType::Spot)
    }

    /// Markets whose positions are leveraged and can be liquidated.
    pub fn is_leveraged(&self) -> bool {
        matches!(self, MarketType::Perpetual | MarketType::ExpiryFutures)
    }

    fn tag(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Perpetual => "perpetual",
            MarketType::ExpiryFutures => "expiry_futures",
            MarketType::BinaryOptions => "binary_options",
        }
    }
}

/// 12.1: lifecycle. Demolished is terminal; Expired only moves on to Demolished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketStatus {
    #[default]
    Unspecified,
    Active,
    Paused,
    Expired,
    Demolished,
}

impl MarketStatus {
    pub fn can_transition_to(&self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Unspecified, Active)
                | (Active, Paused)
                | (Active, Expired)
                | (Active, Demolished)
                | (Paused, Active)
                | (Paused, Demolished)
                | (Expired, Demolished)
        )
    }

    pub fn accepts_orders(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, MarketStatus::Demolished)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleParams {
    pub base: String,
    pub quote: String,
}

impl OracleParams {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }
}

/// Price a dated market closes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementPrice {
    Price(Decimal),
    /// close every position at its own entry price
    RefundAtEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryInfo {
    pub expiration_timestamp: Timestamp,
    /// binary options settle separately from expiring
    pub settlement_timestamp: Option<Timestamp>,
    pub settlement_price: Option<SettlementPrice>,
}

/// Perpetual-only funding parameters plus running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualInfo {
    pub params: FundingParams,
    pub state: FundingState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub ticker: String,
    pub market_type: MarketType,
    /// spot only
    pub base_denom: Option<Denom>,
    pub quote_denom: Denom,
    pub oracle: Option<OracleParams>,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub relayer_fee_share_rate: Decimal,
    pub margin: Option<MarginRatios>,
    pub perpetual: Option<PerpetualInfo>,
    pub expiry: Option<ExpiryInfo>,
    /// binary options price ceiling
    pub settlement_scale: Option<Decimal>,
    pub status: MarketStatus,
    /// resolved at begin block
    pub mark_price_snapshot: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub open_interest: Decimal,
    pub volume: Decimal,
    pub launched_at: Timestamp,
}

// 12.2: content-derived ids. same instrument, same id, on every node
pub fn spot_market_id(base: &Denom, quote: &Denom) -> MarketId {
    MarketId::derive(&[MarketType::Spot.tag(), base.as_str(), quote.as_str()])
}

pub fn derivative_market_id(
    market_type: MarketType,
    ticker: &str,
    quote: &Denom,
    oracle: &OracleParams,
    expiry: Option<Timestamp>,
) -> MarketId {
    let expiry = expiry.map(|t| t.as_secs().to_string()).unwrap_or_default();
    MarketId::derive(&[
        market_type.tag(),
        ticker,
        quote.as_str(),
        &oracle.base,
        &oracle.quote,
        &expiry,
    ])
}

impl Market {
    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn ensure_accepts_orders(&self) -> Result<(), MarketError> {
        if self.status.accepts_orders() {
            Ok(())
        } else {
            Err(MarketError::NotActive {
                market_id: self.id,
                status: self.status,
            })
        }
    }

    pub fn margin_ratios(&self) -> Result<MarginRatios, MarketError> {
        self.margin.ok_or(MarketError::NotLeveraged(self.id))
    }

    pub fn base_denom(&self) -> Result<&Denom, MarketError> {
        self.base_denom.as_ref().ok_or(MarketError::NotSpot(self.id))
    }

    pub fn cumulative_funding(&self) -> Decimal {
        self.perpetual
            .map(|p| p.state.cumulative_funding)
            .unwrap_or_default()
    }

    // 12.3: exact tick alignment. misaligned input is rejected, never rounded
    pub fn validate_price(&self, price: Decimal) -> Result<Price, MarketError> {
        if !is_tick_aligned(price, self.min_price_tick_size) {
            return Err(MarketError::InvalidPriceTick {
                price,
                tick: self.min_price_tick_size,
            });
        }
        if let Some(scale) = self.settlement_scale {
            if price >= scale {
                return Err(MarketError::PriceOutOfRange { price, max: scale });
            }
        }
        Price::new(price).ok_or(MarketError::InvalidPriceTick {
            price,
            tick: self.min_price_tick_size,
        })
    }

    pub fn validate_quantity(&self, quantity: Decimal) -> Result<Decimal, MarketError> {
        if !is_tick_aligned(quantity, self.min_quantity_tick_size) {
            return Err(MarketError::InvalidQuantityTick {
                quantity,
                tick: self.min_quantity_tick_size,
            });
        }
        Ok(quantity)
    }

    pub fn transition(&mut self, next: MarketStatus) -> Result<MarketStatus, MarketError> {
        if self.status == next {
            return Ok(next);
        }
        if !self.status.can_transition_to(next) {
            return Err(MarketError::InvalidTransition {
                market_id: self.id,
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }

    pub fn record_trade(&mut self, price: Decimal, quantity: Decimal) {
        self.last_trade_price = Some(price);
        self.volume += price * quantity;
    }

    /// Maker rebates may never exceed what the taker side leaves after the relayer cut.
    pub fn fees_are_consistent(&self) -> bool {
        fee_rates_are_consistent(self.maker_fee_rate, self.taker_fee_rate, self.relayer_fee_share_rate)
    }
}

pub fn fee_rates_are_consistent(maker: Decimal, taker: Decimal, relayer_share: Decimal) -> bool {
    if taker < Decimal::ZERO || taker >= Decimal::ONE || relayer_share < Decimal::ZERO || relayer_share > Decimal::ONE {
        return false;
    }
    if maker >= Decimal::ZERO {
        return maker < Decimal::ONE;
    }
    -maker <= taker * (Decimal::ONE - relayer_share)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Price {price} not aligned to tick {tick}")]
    InvalidPriceTick { price: Decimal, tick: Decimal },

    #[error("Quantity {quantity} not aligned to tick {tick}")]
    InvalidQuantityTick { quantity: Decimal, tick: Decimal },

    #[error("Price {price} outside (0, {max})")]
    PriceOutOfRange { price: Decimal, max: Decimal },

    #[error("Market {market_id} is {status:?}, not accepting orders")]
    NotActive { market_id: MarketId, status: MarketStatus },

    #[error("Market {market_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        market_id: MarketId,
        from: MarketStatus,
        to: MarketStatus,
    },

    #[error("Market {0} already exists")]
    AlreadyExists(MarketId),

    #[error("Market {0} has no margin ratios")]
    NotLeveraged(MarketId),

    #[error("Market {0} is not a spot market")]
    NotSpot(MarketId),

    #[error("Invalid market parameters: {0}")]
    InvalidParams(String),
}
