use std::fmt;

use contracts::{Account, EngineConfig, RejectReason, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    InvalidAmount(i64),
    Overflow(UserId),
}

impl fmt::Display for EconomyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount(amount) => write!(f, "invalid credit amount {amount}"),
            Self::Overflow(user_id) => write!(f, "credit balance overflow for user {user_id}"),
        }
    }
}

impl std::error::Error for EconomyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purchase {
    Pull,
    Stabilize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tariff {
    pub pull_cost: i64,
    pub stabilize_cost: i64,
}

impl Tariff {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            pull_cost: config.pull_cost,
            stabilize_cost: config.stabilize_cost,
        }
    }

    pub fn price(&self, purchase: Purchase) -> i64 {
        match purchase {
            Purchase::Pull => self.pull_cost,
            Purchase::Stabilize => self.stabilize_cost,
        }
    }

    /// Debits the price and bumps the matching account stat. On failure the
    /// account is left untouched.
    pub fn charge(&self, account: &mut Account, purchase: Purchase) -> Result<(), RejectReason> {
        let price = self.price(purchase);
        if !try_debit(account, price) {
            return Err(RejectReason::InsufficientCredits {
                required: price,
                available: account.credits,
            });
        }

        match purchase {
            Purchase::Pull => account.total_pulls = account.total_pulls.saturating_add(1),
            Purchase::Stabilize => {
                account.total_stabilizations = account.total_stabilizations.saturating_add(1)
            }
        }
        Ok(())
    }
}

/// Check-then-decrement. Non-positive amounts are refused without mutation.
pub fn try_debit(account: &mut Account, amount: i64) -> bool {
    if amount <= 0 || account.credits < amount {
        return false;
    }
    account.credits -= amount;
    true
}

pub fn credit(account: &mut Account, amount: i64) -> Result<i64, EconomyError> {
    if amount <= 0 {
        return Err(EconomyError::InvalidAmount(amount));
    }
    account.credits = account
        .credits
        .checked_add(amount)
        .ok_or(EconomyError::Overflow(account.user_id))?;
    Ok(account.credits)
}
