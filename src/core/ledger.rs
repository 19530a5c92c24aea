//! Append-only transaction ledger
//!
//! This module provides the `TransactionLedger`, the source of truth for
//! payment history and refund eligibility.
//!
//! # Design
//!
//! Records are appended to a single `Vec` and never mutated or removed, so an
//! entry's position is its sequence number. Secondary indexes (payment by id,
//! occupying payment by order, refunds by payment, entries by account) hold
//! positions into that vector. Everything sits behind one
//! `parking_lot::RwLock`: appends take the write lock, history and stats take
//! the read lock.
//!
//! `created_at` is stamped at append time as `max(previous, now)`, so
//! timestamps never go backwards with respect to append order and
//! newest-first by sequence is also newest-first by time.
//!
//! # Lock Order
//!
//! Processors append while holding an account lock. The ledger never calls
//! back into the balance store, so the order is always account, then ledger.

use super::traits::Clock;
use crate::types::{
    AccountId, LedgerError, OrderId, PaymentStatus, PaymentTransaction, RefundStatus,
    RefundTransaction, TransactionId, TransactionRecord,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Position in the ledger to continue a newest-first listing from
///
/// Opaque to callers; the next page holds entries strictly older than the
/// last one returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryCursor(u64);

/// One page of ledger entries, newest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryPage {
    pub entries: Vec<TransactionRecord>,

    /// `None` once the listing is exhausted
    pub next_cursor: Option<HistoryCursor>,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<TransactionRecord>,
    payments: HashMap<TransactionId, usize>,
    occupied_orders: HashMap<OrderId, TransactionId>,
    refunds: HashMap<TransactionId, Vec<usize>>,
    by_account: HashMap<AccountId, Vec<usize>>,
    last_created_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    fn payment(&self, id: TransactionId) -> Option<&PaymentTransaction> {
        let position = *self.payments.get(&id)?;
        match &self.entries[position] {
            TransactionRecord::Payment(payment) => Some(payment),
            TransactionRecord::Refund(_) => None,
        }
    }

    fn refunded_total(&self, id: TransactionId) -> Decimal {
        self.refunds
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|&position| match &self.entries[position] {
                TransactionRecord::Refund(refund) if refund.status == RefundStatus::Completed => {
                    Some(refund.amount.value())
                }
                _ => None,
            })
            .sum()
    }

    fn refundable(&self, payment: &PaymentTransaction) -> Decimal {
        if payment.status != PaymentStatus::Completed {
            return Decimal::ZERO;
        }
        payment.amount.value() - self.refunded_total(payment.transaction_id)
    }

    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamped = match self.last_created_at {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        self.last_created_at = Some(stamped);
        stamped
    }

    fn push(&mut self, record: TransactionRecord) -> usize {
        let position = self.entries.len();
        self.by_account
            .entry(record.account_id())
            .or_default()
            .push(position);
        self.entries.push(record);
        position
    }

    fn positions(&self, account: Option<AccountId>) -> &[usize] {
        match account {
            Some(account_id) => self
                .by_account
                .get(&account_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            None => &[],
        }
    }
}

/// Append-only log of payments and refunds
#[derive(Debug)]
pub struct TransactionLedger {
    state: RwLock<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl TransactionLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
        }
    }

    /// Append a payment record
    ///
    /// The record's `created_at` is overwritten with the append timestamp.
    ///
    /// # Returns
    ///
    /// The record as stored.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOrder` if a non-failed payment already exists for
    /// the order. Failed payments do not occupy their order.
    pub fn append_payment(
        &self,
        mut record: PaymentTransaction,
    ) -> Result<PaymentTransaction, LedgerError> {
        let now = self.clock.now();
        let mut state = self.state.write();

        if let Some(existing) = state.occupied_orders.get(&record.order_id) {
            return Err(LedgerError::duplicate_order(&record.order_id, *existing));
        }

        record.created_at = state.stamp(now);
        if record.status.occupies_order() {
            state
                .occupied_orders
                .insert(record.order_id.clone(), record.transaction_id);
        }
        let position = state.push(TransactionRecord::Payment(record.clone()));
        state.payments.insert(record.transaction_id, position);

        Ok(record)
    }

    /// Append a refund record
    ///
    /// Eligibility is expected to have been checked by the caller within the
    /// same account lock; the ledger re-verifies it.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolation` if the referenced payment is missing or
    /// not completed, if the refund's account or funding source differs from
    /// the payment's, or if a completed refund would exceed what remains
    /// refundable.
    pub fn append_refund(
        &self,
        mut record: RefundTransaction,
    ) -> Result<RefundTransaction, LedgerError> {
        let now = self.clock.now();
        let mut state = self.state.write();

        let payment = state
            .payment(record.payment_transaction_id)
            .ok_or_else(|| {
                LedgerError::integrity_violation(format!(
                    "refund {} references unknown payment {}",
                    record.refund_id, record.payment_transaction_id
                ))
            })?;

        if payment.status != PaymentStatus::Completed
            || payment.account_id != record.account_id
            || payment.source != record.source
            || payment.order_id != record.order_id
        {
            let error = LedgerError::integrity_violation(format!(
                "refund {} does not match payment {}",
                record.refund_id, payment.transaction_id
            ));
            tracing::error!(%error, "rejected refund append");
            return Err(error);
        }

        if record.status == RefundStatus::Completed {
            let refundable = state.refundable(payment);
            if record.amount.value() > refundable {
                let error = LedgerError::integrity_violation(format!(
                    "refund {} of {} exceeds refundable {} on payment {}",
                    record.refund_id, record.amount, refundable, payment.transaction_id
                ));
                tracing::error!(%error, "rejected refund append");
                return Err(error);
            }
        }

        record.created_at = state.stamp(now);
        let position = state.push(TransactionRecord::Refund(record.clone()));
        state
            .refunds
            .entry(record.payment_transaction_id)
            .or_default()
            .push(position);

        Ok(record)
    }

    /// What may still be refunded against a payment
    ///
    /// Zero for payments that did not complete.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolation` if the payment is not in the ledger.
    pub fn refundable_amount(&self, payment_id: TransactionId) -> Result<Decimal, LedgerError> {
        let state = self.state.read();
        let payment = state.payment(payment_id).ok_or_else(|| {
            LedgerError::integrity_violation(format!("unknown payment {}", payment_id))
        })?;
        Ok(state.refundable(payment))
    }

    pub fn payment(&self, payment_id: TransactionId) -> Option<PaymentTransaction> {
        self.state.read().payment(payment_id).cloned()
    }

    /// The payment currently occupying an order, if any
    pub fn payment_for_order(&self, order_id: &str) -> Option<PaymentTransaction> {
        let state = self.state.read();
        let id = *state.occupied_orders.get(order_id)?;
        state.payment(id).cloned()
    }

    /// Refunds recorded against a payment, oldest first
    pub fn refunds_for_payment(&self, payment_id: TransactionId) -> Vec<RefundTransaction> {
        let state = self.state.read();
        state
            .refunds
            .get(&payment_id)
            .into_iter()
            .flatten()
            .filter_map(|&position| match &state.entries[position] {
                TransactionRecord::Refund(refund) => Some(refund.clone()),
                TransactionRecord::Payment(_) => None,
            })
            .collect()
    }

    /// One page of entries, newest first
    ///
    /// # Arguments
    ///
    /// * `account` - Restrict to one account, or `None` for the whole ledger
    /// * `cursor` - Continue after a previous page; `None` starts at the newest entry
    /// * `limit` - Maximum number of entries in the page
    pub fn history_page(
        &self,
        account: Option<AccountId>,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> HistoryPage {
        let state = self.state.read();

        let (start, end) = match account {
            Some(_) => {
                let positions = state.positions(account);
                let end = match cursor {
                    Some(HistoryCursor(seq)) => positions.partition_point(|&p| (p as u64) < seq),
                    None => positions.len(),
                };
                (end.saturating_sub(limit), end)
            }
            None => {
                let end = match cursor {
                    Some(HistoryCursor(seq)) => (seq as usize).min(state.entries.len()),
                    None => state.entries.len(),
                };
                (end.saturating_sub(limit), end)
            }
        };

        let position_at = |i: usize| match account {
            Some(_) => state.positions(account)[i],
            None => i,
        };

        let entries: Vec<TransactionRecord> = (start..end)
            .rev()
            .map(|i| state.entries[position_at(i)].clone())
            .collect();

        let next_cursor = if start > 0 && !entries.is_empty() {
            Some(HistoryCursor(position_at(start) as u64))
        } else {
            None
        };

        HistoryPage {
            entries,
            next_cursor,
        }
    }

    /// Lazy newest-first iterator over an account's history
    ///
    /// Fetches `page_size` entries at a time. Entries appended after the
    /// iterator starts are not visited; calling `history` again restarts from
    /// the newest entry.
    pub fn history(&self, account_id: AccountId, page_size: usize) -> HistoryIter<'_> {
        HistoryIter {
            ledger: self,
            account_id,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// The most recent entries across all accounts, newest first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        self.history_page(None, None, limit).entries
    }

    /// Visit every entry in append order, optionally restricted to one account
    pub fn scan<F>(&self, account: Option<AccountId>, mut f: F)
    where
        F: FnMut(&TransactionRecord),
    {
        let state = self.state.read();
        match account {
            Some(_) => state
                .positions(account)
                .iter()
                .for_each(|&position| f(&state.entries[position])),
            None => state.entries.iter().for_each(f),
        }
    }

    /// Copy of every entry in append order
    pub fn snapshot(&self) -> Vec<TransactionRecord> {
        self.state.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator returned by [`TransactionLedger::history`]
#[derive(Debug)]
pub struct HistoryIter<'a> {
    ledger: &'a TransactionLedger,
    account_id: AccountId,
    page_size: usize,
    buffer: VecDeque<TransactionRecord>,
    cursor: Option<HistoryCursor>,
    exhausted: bool,
}

impl Iterator for HistoryIter<'_> {
    type Item = TransactionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .ledger
                .history_page(Some(self.account_id), self.cursor, self.page_size);
            self.exhausted = page.next_cursor.is_none();
            self.cursor = page.next_cursor;
            self.buffer.extend(page.entries);
        }
        self.buffer.pop_front()
    }
}
