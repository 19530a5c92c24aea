//! Thread-safe account balance storage
//!
//! This module provides the `BalanceStore`, the authoritative holder of every
//! account's wallet and card balances.
//!
//! # Design
//!
//! Accounts live in a `DashMap` keyed by account id. Each entry holds its
//! account behind its own `parking_lot::Mutex`, so:
//! - operations on different accounts proceed fully in parallel
//! - operations on the same account are serialized
//! - the map's shard lock is only held long enough to clone the entry's `Arc`
//!
//! # Atomicity
//!
//! Every mutation runs against a working copy of the account while the
//! account's lock is held. The copy is written back only if the whole unit of
//! work succeeds, which lets a processor pair a balance change with its ledger
//! append: if the append fails, the balance change is discarded with it.

use crate::types::{Account, AccountId, AccountStatus, Amount, FundingSource, LedgerError};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Thread-safe store of account balances
#[derive(Debug)]
pub struct BalanceStore {
    /// Account state by id, each behind its own lock
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,

    /// Upper bound on waiting for an account's lock
    lock_timeout: Duration,
}

impl BalanceStore {
    /// Create an empty store
    ///
    /// # Arguments
    ///
    /// * `lock_timeout` - How long an operation may wait for an account's lock
    ///   before failing with the transient `LockTimeout` error
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            accounts: DashMap::new(),
            lock_timeout,
        }
    }

    /// Register a new account
    ///
    /// Accounts are created once, at user registration, and never removed.
    ///
    /// # Errors
    ///
    /// Returns `AccountExists` if the id is already registered; the existing
    /// account is left untouched.
    pub fn open_account(&self, account: Account) -> Result<(), LedgerError> {
        let account_id = account.account_id;
        let mut created = false;
        self.accounts.entry(account_id).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(account))
        });

        if !created {
            return Err(LedgerError::account_exists(account_id));
        }
        tracing::debug!(account_id, "account opened");
        Ok(())
    }

    /// Snapshot of an account's committed state
    pub fn get(&self, account_id: AccountId) -> Option<Account> {
        let slot = self.slot(account_id).ok()?;
        let account = slot.lock().clone();
        Some(account)
    }

    /// Snapshots of all accounts, sorted by account id
    pub fn all_accounts(&self) -> Vec<Account> {
        let slots: Vec<Arc<Mutex<Account>>> = self
            .accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut accounts: Vec<Account> = slots.iter().map(|slot| slot.lock().clone()).collect();
        accounts.sort_by_key(|account| account.account_id);
        accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Freeze, disable or reactivate an account
    pub fn set_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        let (account, ()) = self.transact(account_id, |account| {
            account.status = status;
            Ok(())
        })?;
        tracing::info!(account_id, %status, "account status changed");
        Ok(account)
    }

    /// Atomically remove `amount` from one of an account's balances
    ///
    /// # Returns
    ///
    /// The new balance of the debited source.
    ///
    /// # Errors
    ///
    /// - `AccountNotFound` if the account does not exist
    /// - `AccountUnavailable` if the account is frozen or disabled
    /// - `InsufficientFunds` if the balance is lower than `amount`; nothing is debited
    /// - `LockTimeout` if the account lock could not be acquired in time
    pub fn debit(
        &self,
        account_id: AccountId,
        source: FundingSource,
        amount: Amount,
    ) -> Result<Decimal, LedgerError> {
        let (account, ()) = self.debit_and_then(account_id, source, amount, |_| Ok(()))?;
        Ok(account.balance(source))
    }

    /// Atomically add `amount` to one of an account's balances
    ///
    /// Crediting never fails on balance or status grounds.
    pub fn credit(
        &self,
        account_id: AccountId,
        source: FundingSource,
        amount: Amount,
    ) -> Result<Decimal, LedgerError> {
        let (account, ()) = self.credit_and_then(account_id, source, amount, |_| Ok(()))?;
        Ok(account.balance(source))
    }

    /// Debit an account and run `f` before the debit commits
    ///
    /// `f` sees the account as it will be committed and runs while the
    /// account's lock is held. If `f` fails, the debit is rolled back and the
    /// error is returned.
    ///
    /// # Returns
    ///
    /// The committed account snapshot and the value produced by `f`.
    pub fn debit_and_then<T, F>(
        &self,
        account_id: AccountId,
        source: FundingSource,
        amount: Amount,
        f: F,
    ) -> Result<(Account, T), LedgerError>
    where
        F: FnOnce(&Account) -> Result<T, LedgerError>,
    {
        self.transact(account_id, |account| {
            if !account.accepts_payments() {
                return Err(LedgerError::account_unavailable(account_id, account.status));
            }
            account.debit(source, amount)?;
            f(account)
        })
    }

    /// Credit an account and run `f` before the credit commits
    ///
    /// Same contract as [`BalanceStore::debit_and_then`], without the status
    /// and balance checks.
    pub fn credit_and_then<T, F>(
        &self,
        account_id: AccountId,
        source: FundingSource,
        amount: Amount,
        f: F,
    ) -> Result<(Account, T), LedgerError>
    where
        F: FnOnce(&Account) -> Result<T, LedgerError>,
    {
        self.transact(account_id, |account| {
            account.credit(source, amount)?;
            f(account)
        })
    }

    /// Run `f` against an account's committed state while holding its lock
    ///
    /// Nothing is written back; the version is unchanged.
    pub fn read_locked<T, F>(&self, account_id: AccountId, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Account) -> Result<T, LedgerError>,
    {
        let slot = self.slot(account_id)?;
        let committed = slot
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::lock_timeout(account_id))?;
        f(&committed)
    }

    /// Run a unit of work against a working copy of an account
    ///
    /// The copy replaces the committed state (with its version bumped) only if
    /// `f` succeeds.
    fn transact<T, F>(&self, account_id: AccountId, f: F) -> Result<(Account, T), LedgerError>
    where
        F: FnOnce(&mut Account) -> Result<T, LedgerError>,
    {
        let slot = self.slot(account_id)?;
        let mut committed = slot
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::lock_timeout(account_id))?;

        let mut working = committed.clone();
        let value = f(&mut working)?;
        working.version += 1;
        *committed = working.clone();

        Ok((working, value))
    }

    fn slot(&self, account_id: AccountId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .get(&account_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }
}

impl Default for BalanceStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
