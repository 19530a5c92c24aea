//! Account-related types for the transaction ledger
//!
//! This module defines the Account structure and the balance operations that
//! the BalanceStore applies under an account's lock.

use super::amount::{normalize_balance, Amount, AMOUNT_SCALE};
use super::error::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier
///
/// One account exists per registered user.
pub type AccountId = u32;

/// Lifecycle status of an account
///
/// Accounts are never deleted; they are frozen or disabled instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Normal operation: payments and refunds are accepted
    Active,

    /// Temporarily blocked: new payments are rejected, refunds still credit
    Frozen,

    /// Soft-deleted: new payments are rejected, refunds still credit
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which balance of an account funds a payment
///
/// A refund always credits the balance its payment was drawn from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingSource {
    /// The user's wallet balance
    #[default]
    Wallet,

    /// The prepaid balance of the user's virtual card
    Card,
}

impl FundingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingSource::Wallet => "wallet",
            FundingSource::Card => "card",
        }
    }
}

impl fmt::Display for FundingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account state
///
/// Both balances carry exactly five fractional digits and are never negative
/// in a committed state.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The account ID
    pub account_id: AccountId,

    /// Funds held in the user's wallet
    pub wallet_balance: Decimal,

    /// Funds loaded onto the user's virtual card
    pub card_balance: Decimal,

    /// Whether the account accepts new payments
    pub status: AccountStatus,

    /// Incremented on every committed mutation
    pub version: u64,
}

impl Account {
    /// Create an active account with zero balances
    pub fn new(account_id: AccountId) -> Self {
        Account {
            account_id,
            wallet_balance: Decimal::new(0, AMOUNT_SCALE),
            card_balance: Decimal::new(0, AMOUNT_SCALE),
            status: AccountStatus::Active,
            version: 0,
        }
    }

    /// Create an active account with opening balances
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if either balance is negative
    /// - `PrecisionError` if either balance has more than five fractional digits
    pub fn with_balances(
        account_id: AccountId,
        wallet_balance: Decimal,
        card_balance: Decimal,
    ) -> Result<Self, LedgerError> {
        if wallet_balance < Decimal::ZERO {
            return Err(LedgerError::invalid_amount(wallet_balance));
        }
        if card_balance < Decimal::ZERO {
            return Err(LedgerError::invalid_amount(card_balance));
        }
        Ok(Account {
            account_id,
            wallet_balance: normalize_balance(wallet_balance)?,
            card_balance: normalize_balance(card_balance)?,
            status: AccountStatus::Active,
            version: 0,
        })
    }

    /// Current balance of the given funding source
    pub fn balance(&self, source: FundingSource) -> Decimal {
        match source {
            FundingSource::Wallet => self.wallet_balance,
            FundingSource::Card => self.card_balance,
        }
    }

    fn balance_mut(&mut self, source: FundingSource) -> &mut Decimal {
        match source {
            FundingSource::Wallet => &mut self.wallet_balance,
            FundingSource::Card => &mut self.card_balance,
        }
    }

    /// Remove `amount` from the given balance
    ///
    /// Fails closed: on error the account is left untouched.
    pub fn debit(&mut self, source: FundingSource, amount: Amount) -> Result<Decimal, LedgerError> {
        let account_id = self.account_id;
        let available = self.balance(source);
        if available < amount.value() {
            return Err(LedgerError::insufficient_funds(
                account_id,
                source,
                available,
                amount.value(),
            ));
        }
        let balance = self.balance_mut(source);
        *balance = balance
            .checked_sub(amount.value())
            .ok_or_else(|| LedgerError::arithmetic_overflow("debit", account_id))?;
        Ok(*balance)
    }

    /// Add `amount` to the given balance
    ///
    /// Credits never fail on balance grounds; only decimal overflow is reported.
    pub fn credit(&mut self, source: FundingSource, amount: Amount) -> Result<Decimal, LedgerError> {
        let account_id = self.account_id;
        let balance = self.balance_mut(source);
        *balance = balance
            .checked_add(amount.value())
            .ok_or_else(|| LedgerError::arithmetic_overflow("credit", account_id))?;
        Ok(*balance)
    }

    /// Whether new payments may be charged to this account
    pub fn accepts_payments(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
