//! Per-market insurance funds with share accounting.
//!
//! Underwriters buy shares at the fund's current balance-per-share. The fund
//! absorbs liquidation and settlement deficits and receives the unclaimed
//! part of positive liquidation payouts. Redemptions wait out a notice
//! period unless the market has already settled.

use crate::types::{Denom, MarketId, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shares minted into an empty fund.
pub const INITIAL_SUPPLY: Decimal = dec!(1000000000000000000);
/// Slice of the initial supply nobody can redeem, so an active fund never hits zero shares.
pub const PROTOCOL_OWNED_SHARES: Decimal = dec!(1000000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub id: u64,
    pub redeemer: SubaccountId,
    pub shares: Decimal,
    pub matures_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub market_id: MarketId,
    pub deposit_denom: Denom,
    pub balance: Decimal,
    pub total_share: Decimal,
    pub protocol_shares: Decimal,
    pub shares: BTreeMap<SubaccountId, Decimal>,
    /// seconds
    pub redemption_notice_period: i64,
    pub pending_redemptions: Vec<RedemptionRequest>,
    pub next_redemption_id: u64,
}

impl InsuranceFund {
    pub fn new(
        market_id: MarketId,
        deposit_denom: Denom,
        redemption_notice_period: i64,
        creator: SubaccountId,
        initial_deposit: Decimal,
    ) -> Result<Self, InsuranceError> {
        if initial_deposit <= Decimal::ZERO {
            return Err(InsuranceError::InvalidAmount(initial_deposit));
        }
        let mut shares = BTreeMap::new();
        shares.insert(creator, INITIAL_SUPPLY - PROTOCOL_OWNED_SHARES);
        Ok(Self {
            market_id,
            deposit_denom,
            balance: initial_deposit,
            total_share: INITIAL_SUPPLY,
            protocol_shares: PROTOCOL_OWNED_SHARES,
            shares,
            redemption_notice_period,
            pending_redemptions: Vec::new(),
            next_redemption_id: 1,
        })
    }

    pub fn shares_of(&self, holder: SubaccountId) -> Decimal {
        self.shares.get(&holder).copied().unwrap_or_default()
    }

    pub fn share_value(&self, shares: Decimal) -> Decimal {
        if self.total_share.is_zero() {
            return Decimal::ZERO;
        }
        shares * self.balance / self.total_share
    }

    // 6.4.1: mint shares at the current price. an emptied fund restarts from scratch
    pub fn underwrite(&mut self, underwriter: SubaccountId, amount: Decimal) -> Result<Decimal, InsuranceError> {
        if amount <= Decimal::ZERO {
            return Err(InsuranceError::InvalidAmount(amount));
        }
        let minted = if self.balance.is_zero() || self.total_share.is_zero() {
            self.shares.clear();
            self.pending_redemptions.clear();
            self.total_share = INITIAL_SUPPLY;
            self.protocol_shares = PROTOCOL_OWNED_SHARES;
            INITIAL_SUPPLY - PROTOCOL_OWNED_SHARES
        } else {
            let minted = amount * self.total_share / self.balance;
            self.total_share += minted;
            minted
        };
        self.balance += amount;
        *self.shares.entry(underwriter).or_default() += minted;
        Ok(minted)
    }

    // 6.4.2: lock shares now, pay out once the notice period has passed
    pub fn request_redemption(
        &mut self,
        redeemer: SubaccountId,
        shares: Decimal,
        now: Timestamp,
    ) -> Result<u64, InsuranceError> {
        if shares <= Decimal::ZERO {
            return Err(InsuranceError::InvalidAmount(shares));
        }
        let held = self.shares_of(redeemer);
        if shares > held {
            return Err(InsuranceError::InsufficientShares {
                holder: redeemer,
                requested: shares,
                held,
            });
        }
        let remaining = held - shares;
        if remaining.is_zero() {
            self.shares.remove(&redeemer);
        } else {
            self.shares.insert(redeemer, remaining);
        }
        let id = self.next_redemption_id;
        self.next_redemption_id += 1;
        self.pending_redemptions.push(RedemptionRequest {
            id,
            redeemer,
            shares,
            matures_at: now.plus_secs(self.redemption_notice_period),
        });
        Ok(id)
    }

    /// Pulls out requests due at `now`, oldest first.
    pub fn take_matured(&mut self, now: Timestamp) -> Vec<RedemptionRequest> {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .pending_redemptions
            .drain(..)
            .partition(|r| r.matures_at <= now);
        self.pending_redemptions = waiting;
        due
    }

    pub fn take_all_redemptions(&mut self) -> Vec<RedemptionRequest> {
        std::mem::take(&mut self.pending_redemptions)
    }

    /// Burns the request's shares and returns what they were worth.
    pub fn redeem(&mut self, request: &RedemptionRequest) -> Decimal {
        let amount = self.share_value(request.shares);
        self.balance -= amount;
        self.total_share -= request.shares;
        amount
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        amount <= self.balance
    }

    // 6.4.3: shortfall backstop
    pub fn draw(&mut self, amount: Decimal) -> Result<(), InsuranceError> {
        if amount > self.balance {
            return Err(InsuranceError::Insufficient {
                market_id: self.market_id,
                needed: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InsuranceError {
    #[error("Insurance fund for {0} already exists")]
    AlreadyExists(MarketId),

    #[error("No insurance fund for {0}")]
    NotFound(MarketId),

    #[error("Insurance fund {market_id} holds {available}, needs {needed}")]
    Insufficient {
        market_id: MarketId,
        needed: Decimal,
        available: Decimal,
    },

    #[error("{holder} holds {held} shares, cannot redeem {requested}")]
    InsufficientShares {
        holder: SubaccountId,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}
