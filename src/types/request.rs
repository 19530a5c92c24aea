//! Request and receipt types exchanged with the service's callers
//!
//! Requests carry raw caller input (the card number is validated, never
//! stored). Receipts report post-commit truth: identifiers and the balances
//! as they stood when the operation committed.

use super::account::{AccountId, FundingSource};
use super::transaction::{OrderId, PaymentStatus, RefundId, RefundStatus, TransactionId};
use rust_decimal::Decimal;

/// Raw input to `create_payment`
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// Card number as typed; whitespace is tolerated
    pub card_number: String,

    pub cvv: String,

    /// Must carry exactly five fractional digits
    pub amount: Decimal,

    pub order_id: OrderId,

    pub account_id: AccountId,

    /// Balance to charge; defaults to the wallet
    pub source: FundingSource,

    /// Caller-supplied key; derived from the order when absent
    pub idempotency_key: Option<String>,
}

impl PaymentRequest {
    /// Build a wallet-funded payment request without an explicit idempotency key
    pub fn new(
        card_number: impl Into<String>,
        cvv: impl Into<String>,
        amount: Decimal,
        order_id: impl Into<OrderId>,
        account_id: AccountId,
    ) -> Self {
        Self {
            card_number: card_number.into(),
            cvv: cvv.into(),
            amount,
            order_id: order_id.into(),
            account_id,
            source: FundingSource::Wallet,
            idempotency_key: None,
        }
    }

    pub fn with_source(mut self, source: FundingSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Raw input to `create_refund`
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub order_id: OrderId,

    /// Must carry exactly five fractional digits
    pub amount: Decimal,

    /// When present, must match the account the payment was charged to
    pub account_id: Option<AccountId>,

    /// Caller-supplied key; derived from the order and amount when absent
    pub idempotency_key: Option<String>,
}

impl RefundRequest {
    pub fn new(order_id: impl Into<OrderId>, amount: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            amount,
            account_id: None,
            idempotency_key: None,
        }
    }

    pub fn for_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of a committed (or replayed) payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub transaction_id: TransactionId,
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub source: FundingSource,
    pub status: PaymentStatus,
    pub wallet_balance: Decimal,
    pub card_balance: Decimal,
}

/// Result of a committed (or replayed) refund
#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub payment_transaction_id: TransactionId,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub new_wallet_balance: Decimal,
    pub new_card_balance: Decimal,

    /// What may still be refunded against the payment after this refund
    pub refundable_remaining: Decimal,
}

/// A payment or refund request, as replayed from a command stream
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Payment(PaymentRequest),
    Refund(RefundRequest),
}

impl Command {
    /// The account whose balances the command touches, when known up front
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Command::Payment(request) => Some(request.account_id),
            Command::Refund(request) => request.account_id,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Command::Payment(request) => &request.order_id,
            Command::Refund(request) => &request.order_id,
        }
    }
}

/// The receipt a successfully applied command produced
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Payment(PaymentReceipt),
    Refund(RefundReceipt),
}
