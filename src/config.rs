//! Ledger service configuration
//!
//! Timeouts, retention windows and retry bounds used by the idempotency guard,
//! the balance store and the processors. Defaults are production values; the
//! replay CLI overrides a subset of them from command-line flags.

use std::time::Duration;

/// Tunables for the ledger service
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// How long an unresolved reservation is honoured before a retry may take it over
    pub reservation_timeout: Duration,

    /// How long a successful outcome is replayed for its idempotency key
    pub completed_retention: Duration,

    /// How long a failed outcome is replayed for its idempotency key
    pub failure_retention: Duration,

    /// How long a request waits for an in-flight duplicate to resolve
    pub in_flight_wait: Duration,

    /// Upper bound on waiting for an account lock
    pub lock_timeout: Duration,

    /// Internal retries for transient (concurrency) errors
    pub max_retries: u32,

    /// Base delay between retries; the n-th retry waits n times this
    pub retry_backoff: Duration,

    /// Maximum age of a cached stats snapshot
    pub stats_staleness: Duration,

    /// Page size used by the lazy history iterator
    pub history_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::from_secs(30),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            failure_retention: Duration::from_secs(30),
            in_flight_wait: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
            stats_staleness: Duration::from_secs(5),
            history_page_size: 50,
        }
    }
}

impl LedgerConfig {
    /// Override the reservation timeout; the in-flight wait follows it
    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self.in_flight_wait = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_history_page_size(mut self, page_size: usize) -> Self {
        if page_size == 0 {
            tracing::warn!(
                default = self.history_page_size,
                "invalid history page size 0, keeping default"
            );
            return self;
        }
        self.history_page_size = page_size;
        self
    }

    /// Backoff before the given retry attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}
