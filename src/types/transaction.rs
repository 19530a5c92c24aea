//! Transaction-related types for the transaction ledger
//!
//! This module defines the ledger records (payments and refunds), their
//! statuses, and the tagged `TransactionRecord` that readers match on.

use super::account::{AccountId, FundingSource};
use super::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payment transaction identifier
pub type TransactionId = Uuid;

/// Refund transaction identifier
pub type RefundId = Uuid;

/// Storefront order identifier
///
/// At most one non-failed payment may exist per order.
pub type OrderId = String;

/// Status of a payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Accepted but not yet settled
    Pending,

    /// Held for review; still occupies its order
    Frozen,

    /// Settled: funds have left the account
    Completed,

    /// Terminal failure; releases its order for a new attempt
    Failed,
}

impl PaymentStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Whether a payment in this status blocks another payment for the same order
    pub fn occupies_order(&self) -> bool {
        !matches!(self, PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Frozen => "frozen",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a refund transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Completed | RefundStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment as recorded in the ledger
///
/// Only the last four digits of the card are kept; the full number never
/// leaves the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransaction {
    /// Unique payment identifier (UUID v4)
    pub transaction_id: TransactionId,

    /// The order this payment settles
    pub order_id: OrderId,

    /// The account that was debited
    pub account_id: AccountId,

    /// Amount debited, exactly five decimal places
    pub amount: Amount,

    /// Last four digits of the card used
    pub card_last_four: String,

    /// The balance the amount was drawn from
    pub source: FundingSource,

    pub status: PaymentStatus,

    /// Stamped by the ledger at append time
    pub created_at: DateTime<Utc>,
}

/// A refund as recorded in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct RefundTransaction {
    /// Unique refund identifier (UUID v4)
    pub refund_id: RefundId,

    /// The order being refunded
    pub order_id: OrderId,

    /// The payment this refund reconciles against
    pub payment_transaction_id: TransactionId,

    /// The account credited (always the payment's account)
    pub account_id: AccountId,

    /// Amount credited, exactly five decimal places
    pub amount: Amount,

    /// The balance credited (always the payment's funding source)
    pub source: FundingSource,

    pub status: RefundStatus,

    /// Stamped by the ledger at append time
    pub created_at: DateTime<Utc>,
}

/// A ledger entry: either a payment or a refund
///
/// Consumers match exhaustively on the variant; there is no loosely-typed
/// record shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionRecord {
    Payment(PaymentTransaction),
    Refund(RefundTransaction),
}

impl TransactionRecord {
    pub fn account_id(&self) -> AccountId {
        match self {
            TransactionRecord::Payment(payment) => payment.account_id,
            TransactionRecord::Refund(refund) => refund.account_id,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            TransactionRecord::Payment(payment) => &payment.order_id,
            TransactionRecord::Refund(refund) => &refund.order_id,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            TransactionRecord::Payment(payment) => payment.amount,
            TransactionRecord::Refund(refund) => refund.amount,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TransactionRecord::Payment(payment) => payment.created_at,
            TransactionRecord::Refund(refund) => refund.created_at,
        }
    }

    /// Identifier of the record itself (transaction or refund id)
    pub fn id(&self) -> Uuid {
        match self {
            TransactionRecord::Payment(payment) => payment.transaction_id,
            TransactionRecord::Refund(refund) => refund.refund_id,
        }
    }

    /// Whether the record moved money
    pub fn is_completed(&self) -> bool {
        match self {
            TransactionRecord::Payment(payment) => payment.status == PaymentStatus::Completed,
            TransactionRecord::Refund(refund) => refund.status == RefundStatus::Completed,
        }
    }
}

impl From<PaymentTransaction> for TransactionRecord {
    fn from(payment: PaymentTransaction) -> Self {
        TransactionRecord::Payment(payment)
    }
}

impl From<RefundTransaction> for TransactionRecord {
    fn from(refund: RefundTransaction) -> Self {
        TransactionRecord::Refund(refund)
    }
}
