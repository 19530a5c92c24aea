//! Refund processing
//!
//! A refund moves through these stages:
//!
//! ```text
//! Received -> Validated -> EligibilityChecked -> Credited -> Logged(completed)
//!                              \          \
//!                           NotFound   ExceedsRefundable / AlreadyRefunded
//! ```
//!
//! A refund always credits the account and funding source its payment was
//! drawn from. The refundable amount is read and the refund appended while
//! that account's lock is held, so two refunds of one payment cannot both
//! pass the eligibility check.
//!
//! Without an explicit idempotency key, a refund is identified by its order
//! and amount. A repeat of a completed refund is replayed only while the
//! payment still has that much left to refund; otherwise it is rejected with
//! `ExceedsRefundable`. Two equal partial refunds of one order therefore need
//! distinct keys.

use super::balance_store::BalanceStore;
use super::idempotency::{Fingerprint, IdempotencyGuard, IdempotencyKey, OperationKind, Reservation};
use super::ledger::TransactionLedger;
use super::retry::retry_transient;
use super::traits::Clock;
use crate::config::LedgerConfig;
use crate::types::{
    AccountId, Amount, LedgerError, OrderId, PaymentStatus, RefundReceipt, RefundRequest,
    RefundStatus, RefundTransaction,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a refund is in its lifecycle, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStage {
    Received,
    Validated,
    EligibilityChecked,
    Credited,
    Logged,
    NotFound,
    ExceedsRefundable,
    AlreadyRefunded,
}

impl fmt::Display for RefundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Hash)]
struct ValidatedRefund {
    order_id: OrderId,
    amount: Amount,
    account_id: Option<AccountId>,
}

/// Executes refunds against the balance store and the ledger
#[derive(Debug)]
pub struct RefundProcessor {
    balances: Arc<BalanceStore>,
    ledger: Arc<TransactionLedger>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard<RefundReceipt>,
    config: LedgerConfig,
}

impl RefundProcessor {
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

    /// Refund part or all of an order's completed payment
    ///
    /// # Errors
    ///
    /// - `PrecisionError`, `InvalidAmount`, `EmptyOrderId` on malformed input
    /// - `NotFound` if the order has no completed payment (or it belongs to
    ///   another account than the one named in the request)
    /// - `ExceedsRefundable` if the amount is more than what remains refundable
    /// - `AlreadyRefunded` if the idempotency key was consumed by a different refund
    pub fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt, LedgerError> {
        let span = tracing::info_span!("create_refund", order_id = %request.order_id);
        let _entered = span.enter();
        tracing::debug!(stage = %RefundStage::Received);

        let refund = validate(&request).inspect_err(|error| {
            tracing::warn!(%error, "refund rejected");
        })?;
        tracing::debug!(stage = %RefundStage::Validated);

        let (key, derived) = match request.idempotency_key.as_deref() {
            Some(key) => (IdempotencyKey::explicit(OperationKind::Refund, key), false),
            None => (
                IdempotencyKey::derive_with_amount(
                    OperationKind::Refund,
                    &refund.order_id,
                    refund.amount,
                ),
                true,
            ),
        };
        let fingerprint = Fingerprint::of(&refund);

        retry_transient(&self.config, "refund", || {
            self.attempt(&key, derived, fingerprint, &refund)
        })
    }

    /// Drop expired refund idempotency entries
    pub fn purge_expired(&self) -> usize {
        self.guard.purge_expired()
    }

    fn attempt(
        &self,
        key: &IdempotencyKey,
        derived: bool,
        fingerprint: Fingerprint,
        refund: &ValidatedRefund,
    ) -> Result<RefundReceipt, LedgerError> {
        match self
            .guard
            .reserve_or_wait(key, fingerprint, self.config.in_flight_wait)
        {
            Reservation::Granted(token) => {
                let outcome = self.execute(refund);
                match &outcome {
                    Err(error) if error.is_transient() => self.guard.release(token),
                    _ => self.guard.complete(token, outcome.clone()),
                }
                outcome
            }
            Reservation::AlreadyCompleted(Ok(receipt)) => {
                tracing::debug!(%key, refund_id = %receipt.refund_id, "replaying refund");
                self.replay_completed(refund, receipt, derived)
            }
            Reservation::AlreadyCompleted(Err(error)) => {
                tracing::debug!(%key, %error, "replaying refund failure");
                Err(error)
            }
            Reservation::Conflict(receipt) => {
                let error = LedgerError::already_refunded(&refund.order_id, receipt.refund_id);
                tracing::warn!(stage = %RefundStage::AlreadyRefunded, %error, "refund rejected");
                Err(error)
            }
            Reservation::AlreadyInFlight => Err(LedgerError::request_in_flight(key.as_str())),
        }
    }

    /// Answer a repeat of a completed refund with current balances
    ///
    /// A repeat under a derived key must still fit in what remains
    /// refundable, checked under the account lock.
    fn replay_completed(
        &self,
        refund: &ValidatedRefund,
        receipt: RefundReceipt,
        derived: bool,
    ) -> Result<RefundReceipt, LedgerError> {
        let payment = self
            .ledger
            .payment(receipt.payment_transaction_id)
            .ok_or_else(|| {
                LedgerError::integrity_violation(format!(
                    "refund {} points at unknown payment {}",
                    receipt.refund_id, receipt.payment_transaction_id
                ))
            })?;

        self.balances.read_locked(payment.account_id, |account| {
            let refundable = self.ledger.refundable_amount(payment.transaction_id)?;
            if derived && refund.amount.value() > refundable {
                let error = LedgerError::exceeds_refundable(
                    &refund.order_id,
                    refundable,
                    refund.amount.value(),
                );
                tracing::warn!(stage = %RefundStage::ExceedsRefundable, %error, "refund rejected");
                return Err(error);
            }
            Ok(RefundReceipt {
                new_wallet_balance: account.wallet_balance,
                new_card_balance: account.card_balance,
                refundable_remaining: refundable,
                ..receipt
            })
        })
    }

    fn execute(&self, refund: &ValidatedRefund) -> Result<RefundReceipt, LedgerError> {
        let payment = self
            .ledger
            .payment_for_order(&refund.order_id)
            .filter(|payment| payment.status == PaymentStatus::Completed)
            .filter(|payment| {
                refund
                    .account_id
                    .map_or(true, |account_id| account_id == payment.account_id)
            })
            .ok_or_else(|| {
                tracing::warn!(stage = %RefundStage::NotFound, "refund rejected");
                LedgerError::not_found(&refund.order_id)
            })?;

        let record = RefundTransaction {
            refund_id: Uuid::new_v4(),
            order_id: refund.order_id.clone(),
            payment_transaction_id: payment.transaction_id,
            account_id: payment.account_id,
            amount: refund.amount,
            source: payment.source,
            status: RefundStatus::Completed,
            created_at: self.clock.now(),
        };

        let committed = self.balances.credit_and_then(
            payment.account_id,
            payment.source,
            refund.amount,
            |_| {
                let refundable = self.ledger.refundable_amount(payment.transaction_id)?;
                if refund.amount.value() > refundable {
                    return Err(LedgerError::exceeds_refundable(
                        &refund.order_id,
                        refundable,
                        refund.amount.value(),
                    ));
                }
                tracing::debug!(stage = %RefundStage::EligibilityChecked, %refundable);
                tracing::debug!(stage = %RefundStage::Credited);

                let stored = self.ledger.append_refund(record)?;
                Ok((stored, refundable - refund.amount.value()))
            },
        );

        match committed {
            Ok((account, (stored, refundable_remaining))) => {
                tracing::info!(
                    stage = %RefundStage::Logged,
                    refund_id = %stored.refund_id,
                    payment_transaction_id = %stored.payment_transaction_id,
                    amount = %stored.amount,
                    "refund completed"
                );
                Ok(RefundReceipt {
                    refund_id: stored.refund_id,
                    order_id: stored.order_id,
                    payment_transaction_id: stored.payment_transaction_id,
                    amount: stored.amount.value(),
                    status: stored.status,
                    new_wallet_balance: account.wallet_balance,
                    new_card_balance: account.card_balance,
                    refundable_remaining,
                })
            }
            Err(error) => {
                match &error {
                    LedgerError::ExceedsRefundable { .. } => {
                        tracing::warn!(stage = %RefundStage::ExceedsRefundable, %error, "refund rejected")
                    }
                    LedgerError::IntegrityViolation { .. } | LedgerError::ArithmeticOverflow { .. } => {
                        tracing::error!(%error, "refund failed")
                    }
                    _ => tracing::warn!(%error, "refund rejected"),
                }
                Err(error)
            }
        }
    }
}

fn validate(request: &RefundRequest) -> Result<ValidatedRefund, LedgerError> {
    let amount = Amount::new(request.amount)?;
    if request.order_id.trim().is_empty() {
        return Err(LedgerError::EmptyOrderId);
    }
    Ok(ValidatedRefund {
        order_id: request.order_id.clone(),
        amount,
        account_id: request.account_id,
    })
}
