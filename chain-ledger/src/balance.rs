//! In-memory balance cache
//!
//! Derived state only: the cache is rebuilt from scratch by replaying the
//! chain and is never persisted or trusted across restarts.

use crate::error::BalanceError;
use crate::types::{Transaction, Username};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// `username -> balance`, all balances non-negative
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceCache {
    balances: HashMap<Username, Decimal>,
}

impl BalanceCache {
    /// Create empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `from` can be debited `amount` without mutating anything
    pub fn check_debit(&self, from: &Username, amount: Decimal) -> Result<(), BalanceError> {
        match self.balances.get(from) {
            None => Err(BalanceError::UnknownSender(from.to_string())),
            Some(available) if *available < amount => Err(BalanceError::InsufficientBalance {
                username: from.to_string(),
                needed: amount,
                available: *available,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Check that `to` can be credited `amount` without mutating anything
    pub fn check_credit(&self, to: &Username, amount: Decimal) -> Result<Decimal, BalanceError> {
        self.balance(to)
            .checked_add(amount)
            .ok_or_else(|| BalanceError::Overflow(to.to_string()))
    }

    /// Move `amount` from `from` (or mint when `None`) to `to`.
    ///
    /// On error nothing is debited or credited.
    pub fn apply(
        &mut self,
        from: Option<&Username>,
        to: &Username,
        amount: Decimal,
    ) -> Result<(), BalanceError> {
        if let Some(from) = from {
            self.check_debit(from, amount)?;
            // A self-transfer nets to zero
            if from == to {
                return Ok(());
            }
        }
        let credited = self.check_credit(to, amount)?;

        if let Some(from) = from {
            if let Some(balance) = self.balances.get_mut(from) {
                *balance -= amount;
            }
        }
        self.balances.insert(to.clone(), credited);
        Ok(())
    }

    /// Apply a recorded transaction
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), BalanceError> {
        self.apply(tx.from_user.as_ref(), &tx.to_user, tx.amount)
    }

    /// Balance of `username`, zero when unknown
    pub fn balance(&self, username: &Username) -> Decimal {
        self.balances.get(username).copied().unwrap_or(Decimal::ZERO)
    }

    /// All balances, largest first (ties by name)
    pub fn sorted(&self) -> Vec<(Username, Decimal)> {
        let mut all: Vec<(Username, Decimal)> = self
            .balances
            .iter()
            .map(|(user, balance)| (user.clone(), *balance))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Sum of all balances
    pub fn total(&self) -> Result<Decimal, BalanceError> {
        self.balances
            .values()
            .try_fold(Decimal::ZERO, |sum, balance| sum.checked_add(*balance))
            .ok_or_else(|| BalanceError::Overflow("total supply".to_string()))
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// True when no account holds an entry
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.balances.clear();
    }
}
