//! Read side: history, statistics and recent activity
//!
//! Everything here is computed from the ledger; nothing is stored twice. Only
//! completed records count towards statistics.

use super::clock::elapsed;
use super::ledger::TransactionLedger;
use super::traits::Clock;
use crate::types::{AccountId, TransactionRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub use super::ledger::{HistoryCursor, HistoryPage};

/// Which page of a history listing to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// `None` starts at the newest entry
    pub cursor: Option<HistoryCursor>,

    /// `None` uses the configured page size
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit: Some(limit),
        }
    }

    pub fn after(cursor: HistoryCursor, limit: usize) -> Self {
        Self {
            cursor: Some(cursor),
            limit: Some(limit),
        }
    }
}

/// Population that statistics are computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsScope {
    Account(AccountId),
    Global,
}

impl StatsScope {
    fn account(&self) -> Option<AccountId> {
        match self {
            StatsScope::Account(account_id) => Some(*account_id),
            StatsScope::Global => None,
        }
    }
}

/// Aggregate totals over completed ledger records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionStats {
    pub total_payments: Decimal,
    pub total_refunds: Decimal,
    pub payment_count: u64,
    pub refund_count: u64,

    /// `total_payments - total_refunds`
    pub net_revenue: Decimal,
}

impl TransactionStats {
    fn record(&mut self, entry: &TransactionRecord) {
        if !entry.is_completed() {
            return;
        }
        match entry {
            TransactionRecord::Payment(payment) => {
                self.payment_count += 1;
                self.total_payments += payment.amount.value();
            }
            TransactionRecord::Refund(refund) => {
                self.refund_count += 1;
                self.total_refunds += refund.amount.value();
            }
        }
        self.net_revenue = self.total_payments - self.total_refunds;
    }
}

/// Read-only queries over the ledger
#[derive(Debug)]
pub struct QueryService {
    ledger: Arc<TransactionLedger>,
    clock: Arc<dyn Clock>,
    default_page_size: usize,
    staleness: Duration,

    /// Stats snapshots for display, keyed by scope
    cache: DashMap<StatsScope, (DateTime<Utc>, TransactionStats)>,
}

impl QueryService {
    /// # Arguments
    ///
    /// * `default_page_size` - Page size when a request names none
    /// * `staleness` - Maximum age of a cached stats snapshot
    pub fn new(
        ledger: Arc<TransactionLedger>,
        clock: Arc<dyn Clock>,
        default_page_size: usize,
        staleness: Duration,
    ) -> Self {
        Self {
            ledger,
            clock,
            default_page_size,
            staleness,
            cache: DashMap::new(),
        }
    }

    /// One page of an account's history, newest first
    pub fn history(&self, account_id: AccountId, page: PageRequest) -> HistoryPage {
        let limit = page.limit.unwrap_or(self.default_page_size).max(1);
        self.ledger.history_page(Some(account_id), page.cursor, limit)
    }

    /// Totals computed fresh from the ledger
    pub fn stats(&self, scope: StatsScope) -> TransactionStats {
        let mut stats = TransactionStats::default();
        self.ledger.scan(scope.account(), |entry| stats.record(entry));
        stats
    }

    /// Totals for display, at most `staleness` old
    pub fn cached_stats(&self, scope: StatsScope) -> TransactionStats {
        let now = self.clock.now();
        if let Some(cached) = self.cache.get(&scope) {
            let (computed_at, stats) = cached.value();
            if elapsed(*computed_at, now) < self.staleness {
                return stats.clone();
            }
        }

        let stats = self.stats(scope);
        self.cache.insert(scope, (now, stats.clone()));
        stats
    }

    /// The most recent entries across all accounts, newest first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        self.ledger.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::types::{
        Amount, FundingSource, PaymentStatus, PaymentTransaction, RefundStatus, RefundTransaction,
    };
    use uuid::Uuid;

    fn units(n: i64) -> Decimal {
        Decimal::new(n * 100_000, 5)
    }

    fn pay(ledger: &TransactionLedger, order: &str, account_id: AccountId, n: i64) -> PaymentTransaction {
        ledger
            .append_payment(PaymentTransaction {
                transaction_id: Uuid::new_v4(),
                order_id: order.to_string(),
                account_id,
                amount: Amount::new(units(n)).unwrap(),
                card_last_four: "4444".to_string(),
                source: FundingSource::Wallet,
                status: PaymentStatus::Completed,
                created_at: Utc::now(),
            })
            .unwrap()
    }

    fn refund(ledger: &TransactionLedger, payment: &PaymentTransaction, n: i64) {
        ledger
            .append_refund(RefundTransaction {
                refund_id: Uuid::new_v4(),
                order_id: payment.order_id.clone(),
                payment_transaction_id: payment.transaction_id,
                account_id: payment.account_id,
                amount: Amount::new(units(n)).unwrap(),
                source: payment.source,
                status: RefundStatus::Completed,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn service() -> (QueryService, Arc<TransactionLedger>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let ledger = Arc::new(TransactionLedger::new(clock.clone()));
        let service = QueryService::new(
            Arc::clone(&ledger),
            clock.clone(),
            2,
            Duration::from_secs(5),
        );
        (service, ledger, clock)
    }

    #[test]
    fn test_stats_per_account_and_global() {
        let (service, ledger, _) = service();
        let first = pay(&ledger, "ORD-1", 1, 100);
        pay(&ledger, "ORD-2", 1, 50);
        pay(&ledger, "ORD-3", 2, 20);
        refund(&ledger, &first, 40);

        let account = service.stats(StatsScope::Account(1));
        assert_eq!(account.payment_count, 2);
        assert_eq!(account.refund_count, 1);
        assert_eq!(account.total_payments, units(150));
        assert_eq!(account.total_refunds, units(40));
        assert_eq!(account.net_revenue, units(110));

        let global = service.stats(StatsScope::Global);
        assert_eq!(global.payment_count, 3);
        assert_eq!(global.net_revenue, units(130));
    }

    #[test]
    fn test_failed_records_are_not_counted() {
        let (service, ledger, _) = service();
        ledger
            .append_payment(PaymentTransaction {
                transaction_id: Uuid::new_v4(),
                order_id: "ORD-1".to_string(),
                account_id: 1,
                amount: Amount::new(units(10)).unwrap(),
                card_last_four: "4444".to_string(),
                source: FundingSource::Card,
                status: PaymentStatus::Failed,
                created_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(service.stats(StatsScope::Global), TransactionStats::default());
    }

    #[test]
    fn test_cached_stats_respect_staleness_bound() {
        let (service, ledger, clock) = service();
        pay(&ledger, "ORD-1", 1, 10);
        assert_eq!(service.cached_stats(StatsScope::Global).payment_count, 1);

        pay(&ledger, "ORD-2", 1, 10);
        assert_eq!(service.cached_stats(StatsScope::Global).payment_count, 1);

        clock.advance(Duration::from_secs(5));
        assert_eq!(service.cached_stats(StatsScope::Global).payment_count, 2);
    }

    #[test]
    fn test_history_uses_default_page_size() {
        let (service, ledger, _) = service();
        for i in 0..3 {
            pay(&ledger, &format!("ORD-{}", i), 1, 1);
        }

        let page = service.history(1, PageRequest::default());
        assert_eq!(page.entries.len(), 2);

        let rest = service.history(1, PageRequest::after(page.next_cursor.unwrap(), 10));
        assert_eq!(rest.entries.len(), 1);
        assert!(rest.next_cursor.is_none());
    }

    #[test]
    fn test_recent() {
        let (service, ledger, _) = service();
        pay(&ledger, "ORD-1", 1, 1);
        pay(&ledger, "ORD-2", 2, 1);

        let recent = service.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].order_id(), "ORD-2");
    }
}
