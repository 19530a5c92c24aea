//! Request deduplication by idempotency key
//!
//! This module provides the `IdempotencyGuard`, which makes a double-submitted
//! payment or refund safe by construction: every request reserves its key
//! before touching balances, and a second request with the same key either
//! waits for the first one's outcome or replays it.
//!
//! # Lifecycle of a key
//!
//! ```text
//! (absent) --reserve--> InFlight --complete--> Resolved --retention expires--> (absent)
//!                          |  \--release-------------------------------------> (absent)
//!                          \----reservation timeout: next reserve takes over
//! ```
//!
//! Successful outcomes are replayed for `completed_retention`, failures for
//! the much shorter `failure_retention`, so a business-rule rejection can be
//! retried once the underlying condition changes.

use super::clock::elapsed;
use super::traits::Clock;
use crate::config::LedgerConfig;
use crate::types::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The kind of money movement a key protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Payment,
    Refund,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Payment => f.write_str("payment"),
            OperationKind::Refund => f.write_str("refund"),
        }
    }
}

/// Identifies one logical operation across retries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// A key supplied by the caller
    pub fn explicit(kind: OperationKind, key: &str) -> Self {
        Self(format!("{}:key:{}", kind, key))
    }

    /// The key used when the caller supplies none: one per order and operation
    pub fn derive(kind: OperationKind, order_id: &str) -> Self {
        Self(format!("{}:order:{}", kind, order_id))
    }

    /// An order-derived key that also distinguishes amounts
    ///
    /// Used for refunds, where several partial refunds of one order are
    /// distinct operations.
    pub fn derive_with_amount(kind: OperationKind, order_id: &str, amount: impl fmt::Display) -> Self {
        Self(format!("{}:order:{}:{}", kind, order_id, amount))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of the parameters a key was first used with
///
/// Lets the guard tell a true retry (same parameters) from a different
/// request reusing the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Proof of holding a key's reservation
///
/// Resolving a token whose reservation was taken over after a timeout is a
/// no-op.
#[derive(Debug, PartialEq, Eq)]
pub struct ReservationToken {
    key: IdempotencyKey,
    generation: u64,
}

impl ReservationToken {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }
}

/// Result of trying to reserve a key
#[derive(Debug, PartialEq)]
pub enum Reservation<R> {
    /// The caller owns the key and must complete or release it
    Granted(ReservationToken),

    /// Another request holds the key and has not resolved it
    AlreadyInFlight,

    /// The same request already ran; this is its outcome
    AlreadyCompleted(Result<R, LedgerError>),

    /// The key was consumed by a different request that succeeded
    Conflict(R),
}

#[derive(Debug)]
enum Slot<R> {
    InFlight {
        generation: u64,
        reserved_at: DateTime<Utc>,
    },
    Resolved {
        fingerprint: Fingerprint,
        outcome: Result<R, LedgerError>,
        resolved_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct GuardState<R> {
    slots: HashMap<IdempotencyKey, (Fingerprint, Slot<R>)>,
    next_generation: u64,
}

/// Deduplicates requests by idempotency key
///
/// One guard instance serves one processor; its outcomes are that
/// processor's results.
#[derive(Debug)]
pub struct IdempotencyGuard<R> {
    state: Mutex<GuardState<R>>,

    /// Signalled whenever a reservation is resolved or released
    resolved: Condvar,

    clock: Arc<dyn Clock>,
    reservation_timeout: Duration,
    completed_retention: Duration,
    failure_retention: Duration,
}

impl<R: Clone> IdempotencyGuard<R> {
    pub fn new(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(GuardState {
                slots: HashMap::new(),
                next_generation: 0,
            }),
            resolved: Condvar::new(),
            clock,
            reservation_timeout: config.reservation_timeout,
            completed_retention: config.completed_retention,
            failure_retention: config.failure_retention,
        }
    }

    /// Try to reserve `key` without waiting
    pub fn reserve(&self, key: &IdempotencyKey, fingerprint: Fingerprint) -> Reservation<R> {
        let mut state = self.state.lock();
        self.try_reserve(&mut state, key, fingerprint)
    }

    /// Reserve `key`, waiting up to `wait` for an in-flight holder to resolve
    ///
    /// Returns `AlreadyInFlight` only if the holder is still working when the
    /// wait runs out.
    pub fn reserve_or_wait(
        &self,
        key: &IdempotencyKey,
        fingerprint: Fingerprint,
        wait: Duration,
    ) -> Reservation<R> {
        let deadline = Instant::now() + wait;
        let mut state = self.state.lock();
        loop {
            match self.try_reserve(&mut state, key, fingerprint) {
                Reservation::AlreadyInFlight => {
                    if self.resolved.wait_until(&mut state, deadline).timed_out() {
                        return self.try_reserve(&mut state, key, fingerprint);
                    }
                }
                other => return other,
            }
        }
    }

    /// Record the terminal outcome of a granted reservation
    pub fn complete(&self, token: ReservationToken, outcome: Result<R, LedgerError>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.slots.get_mut(&token.key) {
            Some((fingerprint, slot)) if Self::held_by(slot, &token) => {
                *slot = Slot::Resolved {
                    fingerprint: *fingerprint,
                    outcome,
                    resolved_at: now,
                };
            }
            _ => {
                tracing::warn!(key = %token.key, "ignoring outcome for a reservation that was taken over");
            }
        }
        drop(state);
        self.resolved.notify_all();
    }

    /// Drop a granted reservation without recording an outcome
    ///
    /// The next request with the key executes from scratch.
    pub fn release(&self, token: ReservationToken) {
        let mut state = self.state.lock();
        let held = state
            .slots
            .get(&token.key)
            .is_some_and(|(_, slot)| Self::held_by(slot, &token));
        if held {
            state.slots.remove(&token.key);
        }
        drop(state);
        self.resolved.notify_all();
    }

    /// Evict resolved entries past their retention and abandoned reservations
    ///
    /// # Returns
    ///
    /// The number of evicted keys.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let before = state.slots.len();
        state
            .slots
            .retain(|_, (_, slot)| !self.is_expired(slot, now));
        before - state.slots.len()
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_reserve(
        &self,
        state: &mut GuardState<R>,
        key: &IdempotencyKey,
        fingerprint: Fingerprint,
    ) -> Reservation<R> {
        let now = self.clock.now();

        if let Some((held_fingerprint, slot)) = state.slots.get(key) {
            match slot {
                Slot::InFlight { .. } if !self.is_expired(slot, now) => {
                    return Reservation::AlreadyInFlight;
                }
                Slot::InFlight { .. } => {
                    tracing::warn!(key = %key, "taking over abandoned reservation");
                }
                Slot::Resolved { outcome, .. } if !self.is_expired(slot, now) => {
                    let same_request = *held_fingerprint == fingerprint;
                    match outcome {
                        Ok(result) if same_request => {
                            return Reservation::AlreadyCompleted(Ok(result.clone()));
                        }
                        Ok(result) => return Reservation::Conflict(result.clone()),
                        Err(error) if same_request => {
                            return Reservation::AlreadyCompleted(Err(error.clone()));
                        }
                        // A different request may retry after a failure
                        Err(_) => {}
                    }
                }
                Slot::Resolved { .. } => {}
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.slots.insert(
            key.clone(),
            (
                fingerprint,
                Slot::InFlight {
                    generation,
                    reserved_at: now,
                },
            ),
        );
        tracing::debug!(key = %key, generation, "reservation granted");

        Reservation::Granted(ReservationToken {
            key: key.clone(),
            generation,
        })
    }

    fn held_by(slot: &Slot<R>, token: &ReservationToken) -> bool {
        matches!(slot, Slot::InFlight { generation, .. } if *generation == token.generation)
    }

    fn is_expired(&self, slot: &Slot<R>, now: DateTime<Utc>) -> bool {
        match slot {
            Slot::InFlight { reserved_at, .. } => {
                elapsed(*reserved_at, now) >= self.reservation_timeout
            }
            Slot::Resolved {
                outcome,
                resolved_at,
                ..
            } => {
                let retention = if outcome.is_ok() {
                    self.completed_retention
                } else {
                    self.failure_retention
                };
                elapsed(*resolved_at, now) >= retention
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::thread;

    fn guard_with_clock() -> (IdempotencyGuard<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let guard = IdempotencyGuard::new(&LedgerConfig::default(), clock.clone());
        (guard, clock)
    }

    fn key() -> IdempotencyKey {
        IdempotencyKey::derive(OperationKind::Payment, "ORD-1")
    }

    fn granted(reservation: Reservation<String>) -> ReservationToken {
        match reservation {
            Reservation::Granted(token) => token,
            other => panic!("expected grant, got {:?}", other),
        }
    }

    #[test]
    fn test_derived_keys_separate_operations_and_amounts() {
        assert_ne!(
            IdempotencyKey::derive(OperationKind::Payment, "ORD-1"),
            IdempotencyKey::derive(OperationKind::Refund, "ORD-1")
        );
        assert_ne!(
            IdempotencyKey::derive_with_amount(OperationKind::Refund, "ORD-1", "40.00000"),
            IdempotencyKey::derive_with_amount(OperationKind::Refund, "ORD-1", "60.00000")
        );
        assert_ne!(
            IdempotencyKey::explicit(OperationKind::Payment, "ORD-1"),
            IdempotencyKey::derive(OperationKind::Payment, "ORD-1")
        );
    }

    #[test]
    fn test_second_reserve_sees_in_flight() {
        let (guard, _) = guard_with_clock();
        let fp = Fingerprint::of("a");

        let _token = granted(guard.reserve(&key(), fp));

        assert_eq!(guard.reserve(&key(), fp), Reservation::AlreadyInFlight);
    }

    #[test]
    fn test_completed_outcome_is_replayed() {
        let (guard, _) = guard_with_clock();
        let fp = Fingerprint::of("a");

        let token = granted(guard.reserve(&key(), fp));
        guard.complete(token, Ok("tx-1".to_string()));

        assert_eq!(
            guard.reserve(&key(), fp),
            Reservation::AlreadyCompleted(Ok("tx-1".to_string()))
        );
    }

    #[test]
    fn test_different_request_conflicts_with_success() {
        let (guard, _) = guard_with_clock();

        let token = granted(guard.reserve(&key(), Fingerprint::of("a")));
        guard.complete(token, Ok("tx-1".to_string()));

        assert_eq!(
            guard.reserve(&key(), Fingerprint::of("b")),
            Reservation::Conflict("tx-1".to_string())
        );
    }

    #[test]
    fn test_failure_replayed_only_within_retention() {
        let (guard, clock) = guard_with_clock();
        let fp = Fingerprint::of("a");
        let failure = LedgerError::not_found("ORD-1");

        let token = granted(guard.reserve(&key(), fp));
        guard.complete(token, Err(failure.clone()));

        assert_eq!(
            guard.reserve(&key(), fp),
            Reservation::AlreadyCompleted(Err(failure))
        );

        clock.advance(Duration::from_secs(31));
        granted(guard.reserve(&key(), fp));
    }

    #[test]
    fn test_different_request_may_retry_after_failure() {
        let (guard, _) = guard_with_clock();

        let token = granted(guard.reserve(&key(), Fingerprint::of("a")));
        guard.complete(token, Err(LedgerError::not_found("ORD-1")));

        granted(guard.reserve(&key(), Fingerprint::of("b")));
    }

    #[test]
    fn test_abandoned_reservation_is_taken_over_and_stale_token_ignored() {
        let (guard, clock) = guard_with_clock();
        let fp = Fingerprint::of("a");

        let stale = granted(guard.reserve(&key(), fp));
        clock.advance(Duration::from_secs(30));
        let fresh = granted(guard.reserve(&key(), fp));

        guard.complete(stale, Ok("stale".to_string()));
        assert_eq!(guard.reserve(&key(), fp), Reservation::AlreadyInFlight);

        guard.complete(fresh, Ok("fresh".to_string()));
        assert_eq!(
            guard.reserve(&key(), fp),
            Reservation::AlreadyCompleted(Ok("fresh".to_string()))
        );
    }

    #[test]
    fn test_release_allows_reexecution() {
        let (guard, _) = guard_with_clock();
        let fp = Fingerprint::of("a");

        let token = granted(guard.reserve(&key(), fp));
        guard.release(token);

        granted(guard.reserve(&key(), fp));
    }

    #[test]
    fn test_purge_expired() {
        let (guard, clock) = guard_with_clock();
        let fp = Fingerprint::of("a");

        let failed = granted(guard.reserve(&IdempotencyKey::derive(OperationKind::Payment, "F"), fp));
        guard.complete(failed, Err(LedgerError::EmptyOrderId));
        let ok = granted(guard.reserve(&IdempotencyKey::derive(OperationKind::Payment, "S"), fp));
        guard.complete(ok, Ok("tx".to_string()));

        clock.advance(Duration::from_secs(60));

        assert_eq!(guard.purge_expired(), 1);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_wait_times_out_while_holder_works() {
        let (guard, _) = guard_with_clock();
        let fp = Fingerprint::of("a");
        let _token = granted(guard.reserve(&key(), fp));

        let result = guard.reserve_or_wait(&key(), fp, Duration::from_millis(20));

        assert_eq!(result, Reservation::AlreadyInFlight);
    }

    #[test]
    fn test_concurrent_waiters_observe_single_outcome() {
        let guard = Arc::new(IdempotencyGuard::<String>::new(
            &LedgerConfig::default(),
            Arc::new(ManualClock::default()),
        ));
        let fp = Fingerprint::of("a");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || {
                    match guard.reserve_or_wait(&key(), fp, Duration::from_secs(5)) {
                        Reservation::Granted(token) => {
                            thread::sleep(Duration::from_millis(20));
                            let outcome = format!("winner-{}", i);
                            guard.complete(token, Ok(outcome.clone()));
                            (true, outcome)
                        }
                        Reservation::AlreadyCompleted(Ok(outcome)) => (false, outcome),
                        other => panic!("unexpected reservation {:?}", other),
                    }
                })
            })
            .collect();

        let results: Vec<(bool, String)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
        let first = &results[0].1;
        assert!(results.iter().all(|(_, outcome)| outcome == first));
    }
}
