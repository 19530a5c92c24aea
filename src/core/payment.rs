//! Payment processing
//!
//! A payment moves through these stages:
//!
//! ```text
//! Received -> Validated -> Reserved -> Debited -> Logged(completed)
//!     \            \            \
//!      ValidationFailed   DuplicateOrRaced   InsufficientFunds
//! ```
//!
//! Card, CVV and amount are validated before any lock is taken. The
//! idempotency key is then reserved, and the debit and the ledger append run
//! as one unit under the account's lock: either both commit or neither does.

use super::balance_store::BalanceStore;
use super::card_validator::{last_four, validate_card_number, validate_cvv};
use super::idempotency::{Fingerprint, IdempotencyGuard, IdempotencyKey, OperationKind, Reservation};
use super::ledger::TransactionLedger;
use super::retry::retry_transient;
use super::traits::Clock;
use crate::config::LedgerConfig;
use crate::types::{
    Account, AccountId, Amount, FundingSource, LedgerError, OrderId, PaymentReceipt,
    PaymentRequest, PaymentStatus, PaymentTransaction,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a payment is in its lifecycle, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStage {
    Received,
    Validated,
    Reserved,
    Debited,
    Logged,
    ValidationFailed,
    DuplicateOrRaced,
    InsufficientFunds,
}

impl PaymentStage {
    /// The failure exit a rejected payment ends in
    fn of_failure(error: &LedgerError) -> Self {
        match error {
            LedgerError::InvalidCardNumber { .. }
            | LedgerError::InvalidCvv { .. }
            | LedgerError::PrecisionError { .. }
            | LedgerError::InvalidAmount { .. }
            | LedgerError::EmptyOrderId => PaymentStage::ValidationFailed,
            LedgerError::InsufficientFunds { .. } => PaymentStage::InsufficientFunds,
            _ => PaymentStage::DuplicateOrRaced,
        }
    }
}

impl fmt::Display for PaymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request that passed validation
///
/// The full card number is dropped here; only its last four digits go on.
#[derive(Debug, Clone, Hash)]
struct ValidatedPayment {
    order_id: OrderId,
    account_id: AccountId,
    amount: Amount,
    source: FundingSource,
    card_last_four: String,
}

impl ValidatedPayment {
    fn matches(&self, existing: &PaymentTransaction) -> bool {
        existing.account_id == self.account_id
            && existing.amount == self.amount
            && existing.source == self.source
            && existing.card_last_four == self.card_last_four
    }
}

/// Executes payments against the balance store and the ledger
#[derive(Debug)]
pub struct PaymentProcessor {
    balances: Arc<BalanceStore>,
    ledger: Arc<TransactionLedger>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard<PaymentReceipt>,
    config: LedgerConfig,
}

impl PaymentProcessor {
    pub fn new(
        balances: Arc<BalanceStore>,
        ledger: Arc<TransactionLedger>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(&config, Arc::clone(&clock)),
            balances,
            ledger,
            clock,
            config,
        }
    }

    /// Charge a payment for an order
    ///
    /// # Returns
    ///
    /// A receipt with the completed transaction and the account's balances as
    /// committed. A retry of an already completed payment returns the
    /// original transaction id.
    ///
    /// # Errors
    ///
    /// - `InvalidCardNumber`, `InvalidCvv`, `PrecisionError`, `InvalidAmount`,
    ///   `EmptyOrderId` on malformed input; nothing is reserved or mutated
    /// - `InsufficientFunds` if the chosen balance cannot cover the amount
    /// - `DuplicateOrder` if the order was already paid with other parameters
    /// - `AccountNotFound`, `AccountUnavailable` for unknown or inactive accounts
    /// - `RequestInFlight`, `LockTimeout` if contention outlasts the retries
    pub fn create_payment(&self, request: PaymentRequest) -> Result<PaymentReceipt, LedgerError> {
        let span = tracing::info_span!(
            "create_payment",
            order_id = %request.order_id,
            account_id = request.account_id
        );
        let _entered = span.enter();
        tracing::debug!(stage = %PaymentStage::Received);

        let payment = validate(&request).inspect_err(|error| {
            tracing::warn!(stage = %PaymentStage::of_failure(error), %error, "payment rejected");
        })?;
        tracing::debug!(stage = %PaymentStage::Validated);

        let key = match request.idempotency_key.as_deref() {
            Some(key) => IdempotencyKey::explicit(OperationKind::Payment, key),
            None => IdempotencyKey::derive(OperationKind::Payment, &payment.order_id),
        };
        let fingerprint = Fingerprint::of(&payment);

        retry_transient(&self.config, "payment", || self.attempt(&key, fingerprint, &payment))
    }

    /// Drop expired payment idempotency entries
    pub fn purge_expired(&self) -> usize {
        self.guard.purge_expired()
    }

    fn attempt(
        &self,
        key: &IdempotencyKey,
        fingerprint: Fingerprint,
        payment: &ValidatedPayment,
    ) -> Result<PaymentReceipt, LedgerError> {
        match self
            .guard
            .reserve_or_wait(key, fingerprint, self.config.in_flight_wait)
        {
            Reservation::Granted(token) => {
                tracing::debug!(stage = %PaymentStage::Reserved, %key);
                let outcome = self.execute(payment);
                match &outcome {
                    Err(error) if error.is_transient() => self.guard.release(token),
                    _ => self.guard.complete(token, outcome.clone()),
                }
                outcome
            }
            Reservation::AlreadyCompleted(outcome) => {
                tracing::debug!(%key, "replaying payment outcome");
                outcome
            }
            Reservation::Conflict(receipt) => {
                let error = LedgerError::duplicate_order(&payment.order_id, receipt.transaction_id);
                tracing::warn!(stage = %PaymentStage::DuplicateOrRaced, %error, "payment rejected");
                Err(error)
            }
            Reservation::AlreadyInFlight => Err(LedgerError::request_in_flight(key.as_str())),
        }
    }

    /// Debit and log a reserved payment
    fn execute(&self, payment: &ValidatedPayment) -> Result<PaymentReceipt, LedgerError> {
        if let Some(existing) = self.ledger.payment_for_order(&payment.order_id) {
            return self.resolve_duplicate(payment, existing);
        }

        let record = PaymentTransaction {
            transaction_id: Uuid::new_v4(),
            order_id: payment.order_id.clone(),
            account_id: payment.account_id,
            amount: payment.amount,
            card_last_four: payment.card_last_four.clone(),
            source: payment.source,
            status: PaymentStatus::Completed,
            created_at: self.clock.now(),
        };

        let committed = self.balances.debit_and_then(
            payment.account_id,
            payment.source,
            payment.amount,
            |_| {
                tracing::debug!(stage = %PaymentStage::Debited);
                self.ledger.append_payment(record)
            },
        );

        match committed {
            Ok((account, stored)) => {
                tracing::info!(
                    stage = %PaymentStage::Logged,
                    transaction_id = %stored.transaction_id,
                    amount = %stored.amount,
                    source = %stored.source,
                    "payment completed"
                );
                Ok(receipt(&stored, &account))
            }
            // Lost a race for the order to a request with another key
            Err(LedgerError::DuplicateOrder { .. }) => {
                match self.ledger.payment_for_order(&payment.order_id) {
                    Some(existing) => self.resolve_duplicate(payment, existing),
                    None => Err(LedgerError::integrity_violation(format!(
                        "order {} reported as paid but has no payment",
                        payment.order_id
                    ))),
                }
            }
            Err(error) => {
                tracing::warn!(stage = %PaymentStage::of_failure(&error), %error, "payment rejected");
                Err(error)
            }
        }
    }

    /// Replay an identical earlier payment, reject anything else
    fn resolve_duplicate(
        &self,
        payment: &ValidatedPayment,
        existing: PaymentTransaction,
    ) -> Result<PaymentReceipt, LedgerError> {
        if !payment.matches(&existing) {
            let error = LedgerError::duplicate_order(&payment.order_id, existing.transaction_id);
            tracing::warn!(stage = %PaymentStage::DuplicateOrRaced, %error, "payment rejected");
            return Err(error);
        }

        let account = self
            .balances
            .get(existing.account_id)
            .ok_or_else(|| LedgerError::account_not_found(existing.account_id))?;
        tracing::debug!(transaction_id = %existing.transaction_id, "replaying recorded payment");
        Ok(receipt(&existing, &account))
    }
}

fn validate(request: &PaymentRequest) -> Result<ValidatedPayment, LedgerError> {
    let card_number =
        validate_card_number(&request.card_number).map_err(LedgerError::invalid_card_number)?;
    validate_cvv(&request.cvv).map_err(LedgerError::invalid_cvv)?;
    let amount = Amount::new(request.amount)?;
    if request.order_id.trim().is_empty() {
        return Err(LedgerError::EmptyOrderId);
    }

    Ok(ValidatedPayment {
        order_id: request.order_id.clone(),
        account_id: request.account_id,
        amount,
        source: request.source,
        card_last_four: last_four(&card_number),
    })
}

fn receipt(payment: &PaymentTransaction, account: &Account) -> PaymentReceipt {
    PaymentReceipt {
        transaction_id: payment.transaction_id,
        order_id: payment.order_id.clone(),
        account_id: payment.account_id,
        amount: payment.amount.value(),
        source: payment.source,
        status: payment.status,
        wallet_balance: account.wallet_balance,
        card_balance: account.card_balance,
    }
}
