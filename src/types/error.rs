//! Error types for the transaction ledger
//!
//! This module defines every error that can occur while moving money through
//! the ledger. Each error carries a stable machine-readable code (for callers
//! that map errors onto UI messages) and a human-readable reason (its
//! `Display` output).
//!
//! # Error Categories
//!
//! - **Validation**: malformed card number/CVV, bad amount precision. Rejected
//!   before any lock is taken; retryable after the input is corrected.
//! - **Business rule**: insufficient funds, exceeds refundable, duplicate
//!   order. Rejected with no mutation; retryable once the condition changes.
//! - **Concurrency**: request still in flight, account lock timeout. Transient;
//!   retried internally a bounded number of times.
//! - **Integrity**: a ledger write contradicting an invariant. Indicates a bug.
//! - **I/O**: file and CSV failures in the replay pipeline.

use crate::types::account::{AccountId, AccountStatus, FundingSource};
use crate::types::transaction::{OrderId, RefundId, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Structural problems with a card number or CVV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CardValidationError {
    /// Wrong number of digits (card: exactly 16, CVV: 3 or 4)
    #[error("invalid length")]
    InvalidLength,

    /// A character other than a digit is present
    #[error("non-numeric characters")]
    NonNumeric,

    /// The Luhn checksum does not hold
    #[error("checksum failed")]
    ChecksumFailed,
}

/// Broad classification used for retry and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    BusinessRule,
    Concurrency,
    Integrity,
    Io,
}

/// Main error type for the transaction ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// The card number failed structural validation
    #[error("Invalid card number: {reason}")]
    InvalidCardNumber {
        /// What was wrong with the number
        reason: CardValidationError,
    },

    /// The CVV failed structural validation
    #[error("Invalid CVV: {reason}")]
    InvalidCvv {
        /// What was wrong with the CVV
        reason: CardValidationError,
    },

    /// An amount was not expressed with exactly five decimal places
    #[error("Amount {amount} must have exactly 5 decimal places (has {scale})")]
    PrecisionError {
        /// The offending amount
        amount: Decimal,
        /// Its actual number of fractional digits
        scale: u32,
    },

    /// An amount was zero or negative
    #[error("Amount {amount} must be positive")]
    InvalidAmount { amount: Decimal },

    /// The order id was empty
    #[error("Order id must not be empty")]
    EmptyOrderId,

    /// No account exists with the given id
    #[error("Account {account_id} not found")]
    AccountNotFound { account_id: AccountId },

    /// An account with the given id is already registered
    #[error("Account {account_id} already exists")]
    AccountExists { account_id: AccountId },

    /// The account's status does not allow the operation
    #[error("Account {account_id} is {status}")]
    AccountUnavailable {
        account_id: AccountId,
        status: AccountStatus,
    },

    /// The funding balance is lower than the amount requested
    #[error(
        "Insufficient funds in {funding} balance of account {account_id}: available {available}, requested {requested}"
    )]
    InsufficientFunds {
        account_id: AccountId,
        /// The balance that was short
        funding: FundingSource,
        available: Decimal,
        requested: Decimal,
    },

    /// The order already has a non-failed payment with different parameters
    #[error("Order {order_id} already has payment {transaction_id}")]
    DuplicateOrder {
        order_id: OrderId,
        /// The payment already occupying the order
        transaction_id: TransactionId,
    },

    /// No completed payment exists for the order
    #[error("No completed payment found for order {order_id}")]
    NotFound { order_id: OrderId },

    /// The refund is larger than what remains refundable
    #[error("Refund of {requested} for order {order_id} exceeds refundable amount {refundable}")]
    ExceedsRefundable {
        order_id: OrderId,
        /// Remaining refundable amount, for caller display
        refundable: Decimal,
        requested: Decimal,
    },

    /// The idempotency key was already used by a different completed refund
    #[error("Order {order_id} was already refunded by refund {refund_id}")]
    AlreadyRefunded {
        order_id: OrderId,
        refund_id: RefundId,
    },

    /// The caller may not read the account's data
    #[error("Caller is not authorized to access account {account_id}")]
    Unauthorized { account_id: AccountId },

    /// Another request holding the same idempotency key has not finished
    #[error("Request {key} is still in flight")]
    RequestInFlight { key: String },

    /// The account lock could not be acquired in time
    #[error("Timed out waiting for lock on account {account_id}")]
    LockTimeout { account_id: AccountId },

    /// Decimal arithmetic overflowed
    #[error("Arithmetic overflow in {operation} for account {account_id}")]
    ArithmeticOverflow {
        operation: String,
        account_id: AccountId,
    },

    /// A ledger write contradicted a ledger invariant
    #[error("Ledger integrity violation: {message}")]
    IntegrityViolation { message: String },

    /// A CSV row or field could not be parsed
    #[error("Parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        message: String,
    },

    /// I/O error while reading or writing files
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        if error.is_io_error() {
            return LedgerError::Io {
                message: error.to_string(),
            };
        }
        let line = error.position().map(|pos| pos.line());
        LedgerError::Parse {
            line,
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Stable error code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidCardNumber { .. } => "INVALID_CARD_NUMBER",
            LedgerError::InvalidCvv { .. } => "INVALID_CVV",
            LedgerError::PrecisionError { .. } => "PRECISION_ERROR",
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::EmptyOrderId => "EMPTY_ORDER_ID",
            LedgerError::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            LedgerError::AccountExists { .. } => "ACCOUNT_EXISTS",
            LedgerError::AccountUnavailable { .. } => "ACCOUNT_UNAVAILABLE",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::DuplicateOrder { .. } => "DUPLICATE_ORDER",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::ExceedsRefundable { .. } => "EXCEEDS_REFUNDABLE",
            LedgerError::AlreadyRefunded { .. } => "ALREADY_REFUNDED",
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::RequestInFlight { .. } => "REQUEST_IN_FLIGHT",
            LedgerError::LockTimeout { .. } => "LOCK_TIMEOUT",
            LedgerError::ArithmeticOverflow { .. } => "ARITHMETIC_OVERFLOW",
            LedgerError::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            LedgerError::Parse { .. } => "PARSE_ERROR",
            LedgerError::Io { .. } => "IO_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidCardNumber { .. }
            | LedgerError::InvalidCvv { .. }
            | LedgerError::PrecisionError { .. }
            | LedgerError::InvalidAmount { .. }
            | LedgerError::EmptyOrderId
            | LedgerError::Parse { .. } => ErrorCategory::Validation,
            LedgerError::AccountNotFound { .. }
            | LedgerError::AccountExists { .. }
            | LedgerError::AccountUnavailable { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::DuplicateOrder { .. }
            | LedgerError::NotFound { .. }
            | LedgerError::ExceedsRefundable { .. }
            | LedgerError::AlreadyRefunded { .. }
            | LedgerError::Unauthorized { .. } => ErrorCategory::BusinessRule,
            LedgerError::RequestInFlight { .. } | LedgerError::LockTimeout { .. } => {
                ErrorCategory::Concurrency
            }
            LedgerError::ArithmeticOverflow { .. } | LedgerError::IntegrityViolation { .. } => {
                ErrorCategory::Integrity
            }
            LedgerError::Io { .. } => ErrorCategory::Io,
        }
    }

    /// Whether retrying the same request may succeed without any change
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Concurrency
    }
}

// Helper functions for creating common errors

impl LedgerError {
    pub fn invalid_card_number(reason: CardValidationError) -> Self {
        LedgerError::InvalidCardNumber { reason }
    }

    pub fn invalid_cvv(reason: CardValidationError) -> Self {
        LedgerError::InvalidCvv { reason }
    }

    pub fn precision_error(amount: Decimal) -> Self {
        LedgerError::PrecisionError {
            amount,
            scale: amount.scale(),
        }
    }

    pub fn invalid_amount(amount: Decimal) -> Self {
        LedgerError::InvalidAmount { amount }
    }

    pub fn account_not_found(account_id: AccountId) -> Self {
        LedgerError::AccountNotFound { account_id }
    }

    pub fn account_exists(account_id: AccountId) -> Self {
        LedgerError::AccountExists { account_id }
    }

    pub fn account_unavailable(account_id: AccountId, status: AccountStatus) -> Self {
        LedgerError::AccountUnavailable { account_id, status }
    }

    pub fn insufficient_funds(
        account_id: AccountId,
        funding: FundingSource,
        available: Decimal,
        requested: Decimal,
    ) -> Self {
        LedgerError::InsufficientFunds {
            account_id,
            funding,
            available,
            requested,
        }
    }

    pub fn duplicate_order(order_id: &str, transaction_id: TransactionId) -> Self {
        LedgerError::DuplicateOrder {
            order_id: order_id.to_string(),
            transaction_id,
        }
    }

    pub fn not_found(order_id: &str) -> Self {
        LedgerError::NotFound {
            order_id: order_id.to_string(),
        }
    }

    pub fn exceeds_refundable(order_id: &str, refundable: Decimal, requested: Decimal) -> Self {
        LedgerError::ExceedsRefundable {
            order_id: order_id.to_string(),
            refundable,
            requested,
        }
    }

    pub fn already_refunded(order_id: &str, refund_id: RefundId) -> Self {
        LedgerError::AlreadyRefunded {
            order_id: order_id.to_string(),
            refund_id,
        }
    }

    pub fn unauthorized(account_id: AccountId) -> Self {
        LedgerError::Unauthorized { account_id }
    }

    pub fn request_in_flight(key: &str) -> Self {
        LedgerError::RequestInFlight {
            key: key.to_string(),
        }
    }

    pub fn lock_timeout(account_id: AccountId) -> Self {
        LedgerError::LockTimeout { account_id }
    }

    pub fn arithmetic_overflow(operation: &str, account_id: AccountId) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            account_id,
        }
    }

    pub fn integrity_violation(message: impl Into<String>) -> Self {
        LedgerError::IntegrityViolation {
            message: message.into(),
        }
    }

    pub fn parse(line: Option<u64>, message: impl Into<String>) -> Self {
        LedgerError::Parse {
            line,
            message: message.into(),
        }
    }
}
