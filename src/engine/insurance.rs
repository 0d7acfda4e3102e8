//! Insurance fund operations: creation, underwriting and redemptions.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, InsuranceEvent, RedemptionEvent};
use crate::insurance::{InsuranceError, InsuranceFund, RedemptionRequest};
use crate::market::{derivative_market_id, MarketError, MarketStatus, MarketType, OracleParams};
use crate::oracle::PriceOracle;
use crate::types::{Denom, MarketId, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Everything needed to open a fund ahead of the market it backs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInsuranceFund {
    pub creator: SubaccountId,
    pub ticker: String,
    pub quote_denom: Denom,
    pub oracle: OracleParams,
    pub market_type: MarketType,
    /// expiry futures only
    pub expiry: Option<Timestamp>,
    pub initial_deposit: Decimal,
}

impl NewInsuranceFund {
    /// Id of the market this fund will back.
    pub fn market_id(&self) -> MarketId {
        derivative_market_id(self.market_type, &self.ticker, &self.quote_denom, &self.oracle, self.expiry)
    }
}

impl<O: PriceOracle> Engine<O> {
    pub fn create_insurance_fund(&mut self, request: NewInsuranceFund) -> Result<MarketId, EngineError> {
        if !request.market_type.is_leveraged() {
            return Err(MarketError::InvalidParams(format!(
                "{:?} markets have no insurance fund",
                request.market_type
            ))
            .into());
        }
        if (request.market_type == MarketType::ExpiryFutures) != request.expiry.is_some() {
            return Err(MarketError::InvalidParams("expiry must be set for expiry futures only".to_string()).into());
        }

        self.transact(|e| {
            let market_id = request.market_id();
            if e.ledger.insurance_funds.contains_key(&market_id) {
                return Err(InsuranceError::AlreadyExists(market_id).into());
            }
            let fund = InsuranceFund::new(
                market_id,
                request.quote_denom.clone(),
                e.config.params.insurance_redemption_notice_period,
                request.creator,
                request.initial_deposit,
            )?;
            e.ledger
                .balances
                .debit(request.creator, &request.quote_denom, request.initial_deposit)?;

            info!(market = %market_id, amount = %request.initial_deposit, "insurance fund created");
            e.emit(EventPayload::InsuranceFundCreated(InsuranceEvent {
                market_id,
                subaccount_id: request.creator,
                amount: request.initial_deposit,
                shares: fund.shares_of(request.creator),
            }));
            e.ledger.insurance_funds.insert(market_id, fund);
            Ok(market_id)
        })
    }

    /// Add to a fund and receive shares at the current share price.
    pub fn underwrite(&mut self, underwriter: SubaccountId, market_id: MarketId, amount: Decimal) -> Result<Decimal, EngineError> {
        self.transact(|e| {
            let denom = e.insurance_fund_mut(market_id)?.deposit_denom.clone();
            e.ledger.balances.debit(underwriter, &denom, amount)?;
            let minted = e.insurance_fund_mut(market_id)?.underwrite(underwriter, amount)?;

            debug!(market = %market_id, underwriter = %underwriter, %amount, %minted, "fund underwritten");
            e.emit(EventPayload::InsuranceUnderwritten(InsuranceEvent {
                market_id,
                subaccount_id: underwriter,
                amount,
                shares: minted,
            }));
            Ok(minted)
        })
    }

    /// Queue shares for redemption. Settled markets pay straight away.
    pub fn request_redemption(&mut self, redeemer: SubaccountId, market_id: MarketId, shares: Decimal) -> Result<u64, EngineError> {
        self.transact(|e| {
            let now = e.block.time;
            let redemption_id = e.insurance_fund_mut(market_id)?.request_redemption(redeemer, shares, now)?;
            e.emit(EventPayload::RedemptionRequested(RedemptionEvent {
                market_id,
                redemption_id,
                redeemer,
                shares,
                amount: Decimal::ZERO,
            }));

            let settled = e
                .ledger
                .markets
                .get(&market_id)
                .map_or(false, |m| matches!(m.status, MarketStatus::Expired | MarketStatus::Demolished));
            if settled {
                e.pay_all_redemptions(market_id)?;
            }
            Ok(redemption_id)
        })
    }

    // 10.5: end-block payout of requests past their notice period
    pub(super) fn pay_matured_redemptions(&mut self) -> Result<Decimal, EngineError> {
        let now = self.block.time;
        let funds: Vec<MarketId> = self.ledger.insurance_funds.keys().copied().collect();
        let mut paid = Decimal::ZERO;
        for market_id in funds {
            let due = self.insurance_fund_mut(market_id)?.take_matured(now);
            paid += self.pay_redemptions(market_id, due)?;
        }
        Ok(paid)
    }

    pub(super) fn pay_all_redemptions(&mut self, market_id: MarketId) -> Result<Decimal, EngineError> {
        let Some(fund) = self.ledger.insurance_funds.get_mut(&market_id) else {
            return Ok(Decimal::ZERO);
        };
        let due = fund.take_all_redemptions();
        self.pay_redemptions(market_id, due)
    }

    fn pay_redemptions(&mut self, market_id: MarketId, due: Vec<RedemptionRequest>) -> Result<Decimal, EngineError> {
        let mut paid = Decimal::ZERO;
        for request in due {
            let fund = self.insurance_fund_mut(market_id)?;
            let amount = fund.redeem(&request);
            let denom = fund.deposit_denom.clone();
            self.ledger.balances.credit(request.redeemer, &denom, amount);
            paid += amount;

            debug!(market = %market_id, redeemer = %request.redeemer, %amount, "redemption paid");
            self.emit(EventPayload::RedemptionPaid(RedemptionEvent {
                market_id,
                redemption_id: request.id,
                redeemer: request.redeemer,
                shares: request.shares,
                amount,
            }));
        }
        Ok(paid)
    }

    pub(super) fn insurance_fund_mut(&mut self, market_id: MarketId) -> Result<&mut InsuranceFund, EngineError> {
        self.ledger
            .insurance_funds
            .get_mut(&market_id)
            .ok_or_else(|| InsuranceError::NotFound(market_id).into())
    }
}
