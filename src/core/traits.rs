//! Core traits for the ledger service and its time source
//!
//! Callers (checkout form, refund dialog, admin tables) depend on the
//! [`TransactionService`] trait rather than on the concrete service, so the
//! engine can be injected and replaced in tests.

use crate::types::{
    AccountId, LedgerError, PaymentReceipt, PaymentRequest, RefundReceipt, RefundRequest,
};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use super::query::{HistoryPage, PageRequest, StatsScope, TransactionStats};

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Identity of whoever is calling the read side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// A signed-in user; may only read their own account
    User(AccountId),

    /// Admin tooling; may read any account
    Admin,
}

impl Caller {
    pub fn may_read(&self, account_id: AccountId) -> bool {
        match self {
            Caller::User(own) => *own == account_id,
            Caller::Admin => true,
        }
    }
}

/// The request/response contract exposed to UI and admin callers
pub trait TransactionService: Send + Sync {
    /// Charge a card-backed payment for an order
    fn create_payment(&self, request: PaymentRequest) -> Result<PaymentReceipt, LedgerError>;

    /// Refund part or all of an order's payment
    fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt, LedgerError>;

    /// One page of an account's history, newest first
    fn get_history(
        &self,
        caller: Caller,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<HistoryPage, LedgerError>;

    /// Aggregate totals for one account or for the whole ledger
    fn get_stats(&self, scope: StatsScope) -> TransactionStats;
}
