//! Subaccount deposits.
//!
//! Every (subaccount, denom) pair carries a total balance and the part of it
//! that is still available. The gap between the two is whatever resting
//! orders hold as escrow. Position margin lives on the position, not here.

use crate::journal::Journaled;
use crate::types::{Denom, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub available: Decimal,
    pub total: Decimal,
}

impl Deposit {
    pub fn locked(&self) -> Decimal {
        self.total - self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_zero() && self.total.is_zero()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balances {
    deposits: Journaled<(SubaccountId, Denom), Deposit>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subaccount: SubaccountId, denom: &Denom) -> Deposit {
        self.deposits
            .get(&(subaccount, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, subaccount: SubaccountId, denom: &Denom) -> &mut Deposit {
        self.deposits.entry_or_default((subaccount, denom.clone()))
    }

    pub fn begin(&mut self) {
        self.deposits.begin();
    }

    pub fn commit(&mut self) {
        self.deposits.commit();
    }

    pub fn discard(&mut self) {
        self.deposits.discard();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(SubaccountId, Denom), &Deposit)> {
        self.deposits.iter()
    }

    pub fn insert(&mut self, subaccount: SubaccountId, denom: Denom, deposit: Deposit) {
        self.deposits.insert((subaccount, denom), deposit);
    }

    /// Sum of totals for one denom.
    pub fn total_of(&self, denom: &Denom) -> Decimal {
        self.deposits
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, dep)| dep.total)
            .sum()
    }

    // 10.1: new funds enter total and available together
    pub fn credit(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) {
        let dep = self.entry(subaccount, denom);
        dep.available += amount;
        dep.total += amount;
    }

    // 10.2: spend from available. never lets available go negative
    pub fn debit(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), AccountError> {
        let dep = self.entry(subaccount, denom);
        if amount > dep.available {
            return Err(AccountError::InsufficientBalance {
                subaccount,
                denom: denom.clone(),
                requested: amount,
                available: dep.available,
            });
        }
        dep.available -= amount;
        dep.total -= amount;
        Ok(())
    }

    // 10.3: escrow for a resting order. total stays, available drops
    pub fn lock(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), AccountError> {
        let dep = self.entry(subaccount, denom);
        if amount > dep.available {
            return Err(AccountError::InsufficientBalance {
                subaccount,
                denom: denom.clone(),
                requested: amount,
                available: dep.available,
            });
        }
        dep.available -= amount;
        Ok(())
    }

    pub fn unlock(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) {
        let dep = self.entry(subaccount, denom);
        dep.available += amount;
    }

    // 10.4: locked funds leave the deposit (into a position, a fill, a fee)
    pub fn spend_locked(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), AccountError> {
        let dep = self.entry(subaccount, denom);
        if amount > dep.locked() {
            return Err(AccountError::NegativeBalance {
                subaccount,
                denom: denom.clone(),
            });
        }
        dep.total -= amount;
        Ok(())
    }

    /// Signed settlement. positive credits, negative debits available and
    /// fails instead of leaving the deposit below zero.
    pub fn settle(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), AccountError> {
        if amount >= Decimal::ZERO {
            self.credit(subaccount, denom, amount);
            return Ok(());
        }
        let dep = self.entry(subaccount, denom);
        if -amount > dep.available {
            return Err(AccountError::NegativeBalance {
                subaccount,
                denom: denom.clone(),
            });
        }
        dep.available += amount;
        dep.total += amount;
        Ok(())
    }

    pub fn prune_empty(&mut self) {
        self.deposits.retain(|_, dep| !dep.is_empty());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("{subaccount} has {available} {denom} available, needs {requested}")]
    InsufficientBalance {
        subaccount: SubaccountId,
        denom: Denom,
        requested: Decimal,
        available: Decimal,
    },

    #[error("{subaccount} would go negative in {denom}")]
    NegativeBalance { subaccount: SubaccountId, denom: Denom },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}

impl AccountError {
    pub fn subaccount(&self) -> Option<SubaccountId> {
        match self {
            AccountError::InsufficientBalance { subaccount, .. }
            | AccountError::NegativeBalance { subaccount, .. } => Some(*subaccount),
            AccountError::InvalidAmount(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdt() -> Denom {
        Denom::from("usdt")
    }

    #[test]
    fn credit_and_debit() {
        let mut b = Balances::new();
        b.credit(SubaccountId(1), &usdt(), dec!(100));
        b.debit(SubaccountId(1), &usdt(), dec!(40)).unwrap();
        let dep = b.get(SubaccountId(1), &usdt());
        assert_eq!(dep.available, dec!(60));
        assert_eq!(dep.total, dec!(60));
        assert!(b.debit(SubaccountId(1), &usdt(), dec!(61)).is_err());
    }

    #[test]
    fn lock_unlock_spend() {
        let mut b = Balances::new();
        b.credit(SubaccountId(1), &usdt(), dec!(100));
        b.lock(SubaccountId(1), &usdt(), dec!(30)).unwrap();
        assert_eq!(b.get(SubaccountId(1), &usdt()).locked(), dec!(30));

        b.spend_locked(SubaccountId(1), &usdt(), dec!(20)).unwrap();
        b.unlock(SubaccountId(1), &usdt(), dec!(10));
        let dep = b.get(SubaccountId(1), &usdt());
        assert_eq!(dep.total, dec!(80));
        assert_eq!(dep.available, dec!(80));
        assert!(b.spend_locked(SubaccountId(1), &usdt(), dec!(1)).is_err());
    }

    #[test]
    fn lock_beyond_available_fails() {
        let mut b = Balances::new();
        b.credit(SubaccountId(1), &usdt(), dec!(10));
        let err = b.lock(SubaccountId(1), &usdt(), dec!(11)).unwrap_err();
        assert!(matches!(err, AccountError::InsufficientBalance { .. }));
    }

    #[test]
    fn signed_settle() {
        let mut b = Balances::new();
        b.settle(SubaccountId(2), &usdt(), dec!(5)).unwrap();
        b.settle(SubaccountId(2), &usdt(), dec!(-5)).unwrap();
        assert_eq!(b.get(SubaccountId(2), &usdt()).total, dec!(0));
        assert!(matches!(
            b.settle(SubaccountId(2), &usdt(), dec!(-1)),
            Err(AccountError::NegativeBalance { .. })
        ));
    }

    #[test]
    fn totals_per_denom() {
        let mut b = Balances::new();
        b.credit(SubaccountId(1), &usdt(), dec!(10));
        b.credit(SubaccountId(2), &usdt(), dec!(15));
        b.credit(SubaccountId(2), &Denom::from("inj"), dec!(99));
        assert_eq!(b.total_of(&usdt()), dec!(25));
    }
}
