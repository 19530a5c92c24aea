//! Transaction Ledger Library
//! # Overview
//!
//! This library implements a ledger for virtual-card payments and refunds:
//! balances per account and funding source, an append-only transaction log,
//! idempotent request handling, and paginated history and stats for callers.
//! A CSV replay front end drives the service with either a sync or an async
//! strategy.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Amount, Account, transactions, requests, errors)
//! - [`config`] - Timeouts, retention windows and retry bounds
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::service`] - The [`TransactionService`] implementation
//!   - [`core::payment`] / [`core::refund`] - Request processing
//!   - [`core::balance_store`] - Account balances with atomic updates
//!   - [`core::ledger`] - Append-only transaction history
//!   - [`core::idempotency`] - Duplicate request suppression
//! - [`io`] - CSV reading and writing
//! - [`strategy`] - Sync and async replay of command files
//!
//! # Operations
//!
//! - **Payment**: Validate the card, debit the chosen funding source, log the
//!   payment. A given order is charged at most once.
//! - **Refund**: Credit part or all of a completed payment back to where it
//!   came from. The sum of refunds never exceeds the payment.
//! - **History**: Newest-first pages of an account's payments and refunds.
//! - **Stats**: Totals and net revenue per account or globally.
//!
//! # Money
//!
//! Amounts are decimals with exactly five fractional digits and must be
//! positive. Balances never go negative.

pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategy;
pub mod types;

pub use config::LedgerConfig;
pub use core::{Caller, LedgerService, TransactionService};
pub use io::write_accounts_csv;
pub use types::{
    Account, AccountId, Amount, FundingSource, LedgerError, PaymentReceipt, PaymentRequest,
    RefundReceipt, RefundRequest, TransactionRecord,
};
