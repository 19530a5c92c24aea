//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `amount`: Fixed-point money amounts
//! - `account`: Account-related types
//! - `transaction`: Ledger records and identifiers
//! - `request`: Caller requests and receipts
//! - `error`: Error types for the ledger

pub mod account;
pub mod amount;
pub mod error;
pub mod request;
pub mod transaction;

pub use account::{Account, AccountId, AccountStatus, FundingSource};
pub use amount::{normalize_balance, Amount, AMOUNT_SCALE};
pub use error::{CardValidationError, ErrorCategory, LedgerError};
pub use request::{
    Command, CommandOutcome, PaymentReceipt, PaymentRequest, RefundReceipt, RefundRequest,
};
pub use transaction::{
    OrderId, PaymentStatus, PaymentTransaction, RefundId, RefundStatus, RefundTransaction,
    TransactionId, TransactionRecord,
};
