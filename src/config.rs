// 7.0 config.rs: exchange-wide parameters in one place. fees, margins, funding,
// liquidation, insurance and auction settings.
// 7.1 markets copy defaults from here at launch; proposals may override per market.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::auction::AuctionParams;
use crate::funding::FundingParams;
use crate::liquidation::LiquidationParams;
use crate::margin::MarginRatios;
use crate::mark_price::MarkPriceParams;
use crate::market::fee_rates_are_consistent;

/** 7.2: fee defaults. plain rates, negative maker = rebate */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDefaults {
    pub spot_maker_fee_rate: Decimal,
    pub spot_taker_fee_rate: Decimal,
    pub derivative_maker_fee_rate: Decimal,
    pub derivative_taker_fee_rate: Decimal,
    pub relayer_fee_share_rate: Decimal,
}

impl Default for FeeDefaults {
    fn default() -> Self {
        Self {
            spot_maker_fee_rate: dec!(0.001),
            spot_taker_fee_rate: dec!(0.002),
            derivative_maker_fee_rate: dec!(-0.0001),
            derivative_taker_fee_rate: dec!(0.001),
            relayer_fee_share_rate: dec!(0.4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeParams {
    pub fees: FeeDefaults,
    pub margin: MarginRatios,
    pub funding: FundingParams,
    pub liquidation: LiquidationParams,
    pub mark_price: MarkPriceParams,
    // seconds an insurance redemption waits before paying out
    pub insurance_redemption_notice_period: i64,
    pub auction: AuctionParams,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            fees: FeeDefaults::default(),
            margin: MarginRatios::default(),
            funding: FundingParams::default(),
            liquidation: LiquidationParams::default(),
            mark_price: MarkPriceParams::default(),
            insurance_redemption_notice_period: 14 * 24 * 3600,
            auction: AuctionParams::default(),
        }
    }
}

impl ExchangeParams {
    // short periods so tests and the simulator can walk through them
    pub fn testnet() -> Self {
        let mut params = Self::default();
        params.insurance_redemption_notice_period = 60;
        params.auction.auction_period = 3600;
        params
    }

    // no fees at all, handy for exact balance arithmetic
    pub fn zero_fee() -> Self {
        let mut params = Self::testnet();
        params.fees = FeeDefaults {
            spot_maker_fee_rate: Decimal::ZERO,
            spot_taker_fee_rate: Decimal::ZERO,
            derivative_maker_fee_rate: Decimal::ZERO,
            derivative_taker_fee_rate: Decimal::ZERO,
            relayer_fee_share_rate: Decimal::ZERO,
        };
        params
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.margin.is_valid() {
            return Err(ConfigError::InvalidMargin {
                reason: "initial ratio must exceed maintenance, both in (0, 1)".to_string(),
            });
        }

        let f = &self.fees;
        if !fee_rates_are_consistent(f.spot_maker_fee_rate, f.spot_taker_fee_rate, f.relayer_fee_share_rate)
            || !fee_rates_are_consistent(
                f.derivative_maker_fee_rate,
                f.derivative_taker_fee_rate,
                f.relayer_fee_share_rate,
            )
        {
            return Err(ConfigError::InvalidFees {
                reason: "maker rebate exceeds taker fee after relayer share".to_string(),
            });
        }

        if !self.funding.is_valid() {
            return Err(ConfigError::InvalidFunding {
                reason: "interval must be positive and interest within the cap".to_string(),
            });
        }

        let share = self.liquidation.liquidator_reward_share_rate;
        if share < Decimal::ZERO || share > Decimal::ONE {
            return Err(ConfigError::InvalidLiquidation {
                reason: "liquidator reward share must be in [0, 1]".to_string(),
            });
        }

        if self.insurance_redemption_notice_period < 0 {
            return Err(ConfigError::InvalidInsurance {
                reason: "notice period cannot be negative".to_string(),
            });
        }

        if self.auction.auction_period <= 0 || self.auction.min_next_bid_increment_rate < Decimal::ZERO {
            return Err(ConfigError::InvalidAuction {
                reason: "auction period must be positive, increment non-negative".to_string(),
            });
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let params: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid margin config: {reason}")]
    InvalidMargin { reason: String },
    #[error("invalid fee config: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid funding config: {reason}")]
    InvalidFunding { reason: String },
    #[error("invalid liquidation config: {reason}")]
    InvalidLiquidation { reason: String },
    #[error("invalid insurance config: {reason}")]
    InvalidInsurance { reason: String },
    #[error("invalid auction config: {reason}")]
    InvalidAuction { reason: String },
    #[error("config parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ExchangeParams::default().validate().is_ok());
        assert!(ExchangeParams::testnet().validate().is_ok());
        assert!(ExchangeParams::zero_fee().validate().is_ok());
    }

    #[test]
    fn test_invalid_margin() {
        let mut params = ExchangeParams::default();
        params.margin = MarginRatios::new(dec!(0.01), dec!(0.02));
        assert!(matches!(params.validate(), Err(ConfigError::InvalidMargin { .. })));
    }

    #[test]
    fn test_rebate_too_large() {
        let mut params = ExchangeParams::default();
        params.fees.derivative_maker_fee_rate = dec!(-0.002);
        assert!(matches!(params.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let params = ExchangeParams::testnet();
        let json = serde_json::to_string(&params).unwrap();
        let back = ExchangeParams::from_json(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(ExchangeParams::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
