//! The ledger service facade
//!
//! `LedgerService` wires the balance store, the ledger, both processors and
//! the query service together and implements [`TransactionService`], the
//! contract callers depend on.
//!
//! # Architecture
//!
//! ```text
//! LedgerService
//!     ├── Arc<BalanceStore>        (account balances, per-account locks)
//!     ├── Arc<TransactionLedger>   (append-only history)
//!     ├── PaymentProcessor         (own IdempotencyGuard)
//!     ├── RefundProcessor          (own IdempotencyGuard)
//!     └── QueryService             (history, stats, recent)
//! ```
//!
//! # Thread Safety
//!
//! The service is `Send + Sync` and meant to be shared behind an `Arc`; every
//! component it owns synchronizes internally.

use super::balance_store::BalanceStore;
use super::clock::SystemClock;
use super::ledger::{HistoryIter, TransactionLedger};
use super::payment::PaymentProcessor;
use super::query::{HistoryPage, PageRequest, QueryService, StatsScope, TransactionStats};
use super::refund::RefundProcessor;
use super::traits::{Caller, Clock, TransactionService};
use crate::config::LedgerConfig;
use crate::types::{
    Account, AccountId, AccountStatus, LedgerError, PaymentReceipt, PaymentRequest,
    RefundReceipt, RefundRequest, TransactionRecord,
};
use std::sync::Arc;

/// In-memory transaction ledger service
#[derive(Debug)]
pub struct LedgerService {
    balances: Arc<BalanceStore>,
    ledger: Arc<TransactionLedger>,
    payments: PaymentProcessor,
    refunds: RefundProcessor,
    queries: QueryService,
    config: LedgerConfig,
}

impl LedgerService {
    /// Create a service on the wall clock
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a service on an explicit time source
    pub fn with_clock(config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let balances = Arc::new(BalanceStore::new(config.lock_timeout));
        let ledger = Arc::new(TransactionLedger::new(Arc::clone(&clock)));

        Self {
            payments: PaymentProcessor::new(
                Arc::clone(&balances),
                Arc::clone(&ledger),
                Arc::clone(&clock),
                config.clone(),
            ),
            refunds: RefundProcessor::new(
                Arc::clone(&balances),
                Arc::clone(&ledger),
                Arc::clone(&clock),
                config.clone(),
            ),
            queries: QueryService::new(
                Arc::clone(&ledger),
                clock,
                config.history_page_size,
                config.stats_staleness,
            ),
            balances,
            ledger,
            config,
        }
    }

    /// Register an account
    ///
    /// # Errors
    ///
    /// Returns `AccountExists` if the id is taken.
    pub fn open_account(&self, account: Account) -> Result<(), LedgerError> {
        self.balances.open_account(account)
    }

    pub fn set_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        self.balances.set_status(account_id, status)
    }

    pub fn account(&self, account_id: AccountId) -> Option<Account> {
        self.balances.get(account_id)
    }

    /// Every account, ordered by id
    pub fn accounts(&self) -> Vec<Account> {
        self.balances.all_accounts()
    }

    /// Lazy newest-first iterator over an account's full history
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if `caller` may not read the account.
    pub fn history(
        &self,
        caller: Caller,
        account_id: AccountId,
    ) -> Result<HistoryIter<'_>, LedgerError> {
        authorize(caller, account_id)?;
        Ok(self.ledger.history(account_id, self.config.history_page_size))
    }

    /// Stats for display, possibly up to `stats_staleness` old
    pub fn cached_stats(&self, scope: StatsScope) -> TransactionStats {
        self.queries.cached_stats(scope)
    }

    /// The most recent entries across all accounts, newest first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        self.queries.recent(limit)
    }

    /// Evict expired idempotency entries for both operations
    ///
    /// Long-running callers should call this periodically; nothing is purged
    /// implicitly.
    pub fn purge_expired(&self) -> usize {
        let purged = self.payments.purge_expired() + self.refunds.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "idempotency entries purged");
        }
        purged
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

impl Default for LedgerService {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl TransactionService for LedgerService {
    fn create_payment(&self, request: PaymentRequest) -> Result<PaymentReceipt, LedgerError> {
        self.payments.create_payment(request)
    }

    fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt, LedgerError> {
        self.refunds.create_refund(request)
    }

    fn get_history(
        &self,
        caller: Caller,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<HistoryPage, LedgerError> {
        authorize(caller, account_id)?;
        Ok(self.queries.history(account_id, page))
    }

    fn get_stats(&self, scope: StatsScope) -> TransactionStats {
        self.queries.stats(scope)
    }
}

fn authorize(caller: Caller, account_id: AccountId) -> Result<(), LedgerError> {
    if caller.may_read(account_id) {
        Ok(())
    } else {
        tracing::warn!(?caller, account_id, "history read denied");
        Err(LedgerError::unauthorized(account_id))
    }
}
