//! Service-level scenarios
//!
//! Drives [`LedgerService`] through its public surface: payments, refunds,
//! idempotent retries, concurrent duplicates, history paging and stats.

use proptest::prelude::*;
use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transaction_ledger::core::{
    Caller, Clock, ManualClock, PageRequest, StatsScope, TransactionService,
};
use transaction_ledger::types::{
    Account, AccountStatus, CardValidationError, FundingSource, PaymentRequest, RefundRequest,
};
use transaction_ledger::{LedgerConfig, LedgerError, LedgerService};

const CARD: &str = "4111111111111111";

fn amount(units: i64, fraction: i64) -> Decimal {
    Decimal::new(units * 100_000 + fraction, 5)
}

fn pay(order: &str, value: Decimal) -> PaymentRequest {
    PaymentRequest::new(CARD, "123", value, order, 1)
}

#[fixture]
fn service() -> LedgerService {
    let service = LedgerService::default();
    service
        .open_account(Account::with_balances(1, amount(100, 0), amount(20, 0)).unwrap())
        .unwrap();
    service
        .open_account(Account::with_balances(2, amount(10, 0), Decimal::ZERO).unwrap())
        .unwrap();
    service
}

#[rstest]
fn test_payment_debits_wallet(service: LedgerService) {
    let receipt = service.create_payment(pay("ORD-1", amount(49, 99_900))).unwrap();

    assert_eq!(receipt.order_id, "ORD-1");
    assert_eq!(receipt.wallet_balance, amount(50, 100));
    assert_eq!(receipt.card_balance, amount(20, 0));
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(50, 100));
    assert_eq!(service.ledger().len(), 1);
}

#[rstest]
fn test_refund_over_payment_is_rejected(service: LedgerService) {
    service.create_payment(pay("ORD-1", amount(100, 0))).unwrap();

    let result = service.create_refund(RefundRequest::new("ORD-1", amount(150, 0)));

    assert_eq!(
        result,
        Err(LedgerError::ExceedsRefundable {
            order_id: "ORD-1".to_string(),
            refundable: amount(100, 0),
            requested: amount(150, 0),
        })
    );
    assert_eq!(service.account(1).unwrap().wallet_balance, Decimal::ZERO);
}

#[rstest]
fn test_bad_checksum_changes_nothing(service: LedgerService) {
    let result = service.create_payment(PaymentRequest::new(
        "4111111111111112",
        "123",
        amount(1, 0),
        "ORD-1",
        1,
    ));

    assert_eq!(
        result,
        Err(LedgerError::InvalidCardNumber {
            reason: CardValidationError::ChecksumFailed
        })
    );
    assert!(service.ledger().is_empty());
    assert_eq!(service.account(1).unwrap().version, 0);
}

#[rstest]
#[case::one_unit(amount(1, 0))]
#[case::first_amount_again(amount(40, 0))]
#[case::second_amount_again(amount(60, 0))]
fn test_partial_refunds_exhaust_payment(service: LedgerService, #[case] third_amount: Decimal) {
    service.create_payment(pay("ORD-1", amount(100, 0))).unwrap();

    let first = service
        .create_refund(RefundRequest::new("ORD-1", amount(40, 0)))
        .unwrap();
    let second = service
        .create_refund(RefundRequest::new("ORD-1", amount(60, 0)))
        .unwrap();
    let third = service.create_refund(RefundRequest::new("ORD-1", third_amount));

    assert_eq!(first.refundable_remaining, amount(60, 0));
    assert_eq!(second.refundable_remaining, Decimal::ZERO);
    assert_eq!(second.new_wallet_balance, amount(100, 0));
    assert_eq!(
        third,
        Err(LedgerError::ExceedsRefundable {
            order_id: "ORD-1".to_string(),
            refundable: Decimal::ZERO,
            requested: third_amount,
        })
    );
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(100, 0));
}

#[rstest]
fn test_equal_partial_refunds_need_distinct_keys(service: LedgerService) {
    service.create_payment(pay("ORD-1", amount(100, 0))).unwrap();

    let first = service
        .create_refund(RefundRequest::new("ORD-1", amount(50, 0)))
        .unwrap();
    let repeat = service
        .create_refund(RefundRequest::new("ORD-1", amount(50, 0)))
        .unwrap();
    assert_eq!(repeat.refund_id, first.refund_id);
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(50, 0));

    let keyed = service
        .create_refund(RefundRequest::new("ORD-1", amount(50, 0)).with_idempotency_key("half-2"))
        .unwrap();
    assert_ne!(keyed.refund_id, first.refund_id);
    assert_eq!(keyed.refundable_remaining, Decimal::ZERO);
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(100, 0));

    // a repeat of the first half no longer fits
    assert!(matches!(
        service.create_refund(RefundRequest::new("ORD-1", amount(50, 0))),
        Err(LedgerError::ExceedsRefundable { refundable, .. }) if refundable == Decimal::ZERO
    ));
}

#[rstest]
fn test_card_funded_payment_refunds_to_card(service: LedgerService) {
    service
        .create_payment(pay("ORD-1", amount(15, 0)).with_source(FundingSource::Card))
        .unwrap();

    let refund = service
        .create_refund(RefundRequest::new("ORD-1", amount(5, 0)))
        .unwrap();

    assert_eq!(refund.new_card_balance, amount(10, 0));
    assert_eq!(refund.new_wallet_balance, amount(100, 0));
}

#[rstest]
fn test_retried_payment_returns_original_receipt(service: LedgerService) {
    let first = service.create_payment(pay("ORD-1", amount(10, 0))).unwrap();
    let retry = service.create_payment(pay("ORD-1", amount(10, 0))).unwrap();

    assert_eq!(retry.transaction_id, first.transaction_id);
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(90, 0));
    assert_eq!(service.ledger().len(), 1);
}

#[rstest]
fn test_same_order_different_amount_is_duplicate(service: LedgerService) {
    let first = service.create_payment(pay("ORD-1", amount(10, 0))).unwrap();

    let result = service.create_payment(pay("ORD-1", amount(11, 0)));

    assert_eq!(
        result,
        Err(LedgerError::DuplicateOrder {
            order_id: "ORD-1".to_string(),
            transaction_id: first.transaction_id,
        })
    );
}

#[rstest]
fn test_reused_refund_key_is_already_refunded(service: LedgerService) {
    service.create_payment(pay("ORD-1", amount(10, 0))).unwrap();
    let refund = service
        .create_refund(RefundRequest::new("ORD-1", amount(2, 0)).with_idempotency_key("r-1"))
        .unwrap();

    let result = service
        .create_refund(RefundRequest::new("ORD-1", amount(3, 0)).with_idempotency_key("r-1"));

    assert_eq!(
        result,
        Err(LedgerError::AlreadyRefunded {
            order_id: "ORD-1".to_string(),
            refund_id: refund.refund_id,
        })
    );
}

#[test]
fn test_concurrent_same_order_payments_charge_once() {
    let service = Arc::new(LedgerService::default());
    service
        .open_account(Account::with_balances(1, amount(1_000, 0), Decimal::ZERO).unwrap())
        .unwrap();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                scope.spawn(move || service.create_payment(pay("ORD-1", amount(25, 0))))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let receipts: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert!(receipts
        .iter()
        .all(|r| r.transaction_id == receipts[0].transaction_id));
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(975, 0));
    assert_eq!(service.ledger().len(), 1);
}

#[test]
fn test_concurrent_conflicting_payments_one_wins() {
    let service = Arc::new(LedgerService::default());
    service
        .open_account(Account::with_balances(1, amount(1_000, 0), Decimal::ZERO).unwrap())
        .unwrap();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (1..=8)
            .map(|units| {
                let service = Arc::clone(&service);
                scope.spawn(move || service.create_payment(pay("ORD-1", amount(units, 0))))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::DuplicateOrder { .. })));
    assert_eq!(
        service.account(1).unwrap().wallet_balance,
        amount(1_000, 0) - winners[0].amount
    );
}

#[test]
fn test_concurrent_refunds_never_exceed_payment() {
    let service = Arc::new(LedgerService::default());
    service
        .open_account(Account::with_balances(1, amount(100, 0), Decimal::ZERO).unwrap())
        .unwrap();
    service.create_payment(pay("ORD-1", amount(100, 0))).unwrap();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..10)
            .map(|n| {
                let service = Arc::clone(&service);
                scope.spawn(move || {
                    service.create_refund(
                        RefundRequest::new("ORD-1", amount(30, 0))
                            .with_idempotency_key(format!("refund-{}", n)),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(90, 0));
}

#[test]
fn test_failed_payment_replays_until_retention_expires() {
    let clock = Arc::new(ManualClock::default());
    let service = LedgerService::with_clock(LedgerConfig::default(), clock.clone());
    service
        .open_account(Account::with_balances(1, amount(10, 0), Decimal::ZERO).unwrap())
        .unwrap();
    service.set_status(1, AccountStatus::Frozen).unwrap();

    let first = service.create_payment(pay("ORD-1", amount(5, 0)));
    service.set_status(1, AccountStatus::Active).unwrap();
    let replayed = service.create_payment(pay("ORD-1", amount(5, 0)));
    clock.advance(Duration::from_secs(31));
    let retried = service.create_payment(pay("ORD-1", amount(5, 0)));

    assert!(matches!(first, Err(LedgerError::AccountUnavailable { .. })));
    assert_eq!(replayed, first);
    assert!(retried.is_ok());
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(5, 0));
}

#[test]
fn test_completed_payment_still_deduplicated_after_retention() {
    let clock = Arc::new(ManualClock::default());
    let service = LedgerService::with_clock(LedgerConfig::default(), clock.clone());
    service
        .open_account(Account::with_balances(1, amount(10, 0), Decimal::ZERO).unwrap())
        .unwrap();

    let first = service.create_payment(pay("ORD-1", amount(5, 0))).unwrap();
    clock.advance(Duration::from_secs(25 * 60 * 60));
    let later = service.create_payment(pay("ORD-1", amount(5, 0))).unwrap();

    assert_eq!(later.transaction_id, first.transaction_id);
    assert_eq!(service.account(1).unwrap().wallet_balance, amount(5, 0));
}

#[rstest]
fn test_history_pages_newest_first(service: LedgerService) {
    for n in 0..5 {
        service
            .create_payment(pay(&format!("ORD-{}", n), amount(1, 0)))
            .unwrap();
    }
    service
        .create_payment(PaymentRequest::new(CARD, "123", amount(1, 0), "OTHER", 2))
        .unwrap();

    let mut orders = Vec::new();
    let mut page = service
        .get_history(Caller::User(1), 1, PageRequest::first(2))
        .unwrap();
    let mut pages = 1;
    orders.extend(page.entries.iter().map(|e| e.order_id().to_string()));
    while let Some(cursor) = page.next_cursor {
        page = service
            .get_history(Caller::User(1), 1, PageRequest::after(cursor, 2))
            .unwrap();
        pages += 1;
        orders.extend(page.entries.iter().map(|e| e.order_id().to_string()));
    }

    assert_eq!(pages, 3);
    assert_eq!(orders, vec!["ORD-4", "ORD-3", "ORD-2", "ORD-1", "ORD-0"]);

    let iterated: Vec<String> = service
        .history(Caller::Admin, 1)
        .unwrap()
        .map(|e| e.order_id().to_string())
        .collect();
    assert_eq!(iterated, orders);
}

#[rstest]
fn test_history_of_another_account_is_unauthorized(service: LedgerService) {
    let result = service.get_history(Caller::User(2), 1, PageRequest::default());

    assert_eq!(result, Err(LedgerError::Unauthorized { account_id: 1 }));
    assert!(service.history(Caller::User(2), 1).is_err());
    assert!(service
        .get_history(Caller::Admin, 1, PageRequest::default())
        .is_ok());
}

#[rstest]
fn test_stats_net_revenue(service: LedgerService) {
    service.create_payment(pay("ORD-1", amount(100, 0))).unwrap();
    service
        .create_payment(PaymentRequest::new(CARD, "123", amount(5, 0), "ORD-2", 2))
        .unwrap();
    service
        .create_refund(RefundRequest::new("ORD-1", amount(40, 0)))
        .unwrap();

    let account = service.get_stats(StatsScope::Account(1));
    let global = service.get_stats(StatsScope::Global);

    assert_eq!(account.payment_count, 1);
    assert_eq!(account.refund_count, 1);
    assert_eq!(account.net_revenue, amount(60, 0));
    assert_eq!(global.total_payments, amount(105, 0));
    assert_eq!(global.net_revenue, amount(65, 0));
}

#[derive(Debug, Clone)]
enum Op {
    Pay {
        order: u8,
        cents: i64,
        card: bool,
    },
    Refund {
        order: u8,
        cents: i64,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 1i64..5_000, any::<bool>()).prop_map(|(order, cents, card)| Op::Pay {
            order,
            cents,
            card
        }),
        (0u8..6, 1i64..5_000).prop_map(|(order, cents)| Op::Refund { order, cents }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_money_is_conserved(ops in proptest::collection::vec(op(), 1..40)) {
        let service = LedgerService::default();
        let opening = amount(200, 0) + amount(50, 0);
        service
            .open_account(Account::with_balances(1, amount(200, 0), amount(50, 0)).unwrap())
            .unwrap();

        for op in ops {
            match op {
                Op::Pay { order, cents, card } => {
                    let source = if card { FundingSource::Card } else { FundingSource::Wallet };
                    let _ = service.create_payment(
                        pay(&format!("ORD-{}", order), Decimal::new(cents * 1_000, 5)).with_source(source),
                    );
                }
                Op::Refund { order, cents } => {
                    let _ = service.create_refund(RefundRequest::new(
                        format!("ORD-{}", order),
                        Decimal::new(cents * 1_000, 5),
                    ));
                }
            }
        }

        let account = service.account(1).unwrap();
        let stats = service.get_stats(StatsScope::Account(1));
        prop_assert!(account.wallet_balance >= Decimal::ZERO);
        prop_assert!(account.card_balance >= Decimal::ZERO);
        prop_assert!(stats.total_refunds <= stats.total_payments);
        prop_assert_eq!(account.wallet_balance + account.card_balance + stats.net_revenue, opening);

        for record in service.ledger().snapshot() {
            if let Some(payment) = service.ledger().payment(record.id()) {
                let refunded: Decimal = service
                    .ledger()
                    .refunds_for_payment(payment.transaction_id)
                    .iter()
                    .map(|r| r.amount.value())
                    .sum();
                prop_assert!(refunded <= payment.amount.value());
            }
        }
    }
}

#[test]
fn test_clock_is_injectable() {
    let clock = Arc::new(ManualClock::default());
    let start = clock.now();
    let service = LedgerService::with_clock(LedgerConfig::default(), clock.clone());
    service
        .open_account(Account::with_balances(1, amount(10, 0), Decimal::ZERO).unwrap())
        .unwrap();

    service.create_payment(pay("ORD-1", amount(1, 0))).unwrap();

    assert_eq!(service.recent(1)[0].created_at(), start);
}
