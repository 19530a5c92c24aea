//! Core business logic module
//!
//! This module contains the ledger service components:
//! - `traits` - The service surface and caller identity
//! - `service` - Composition root wiring everything together
//! - `payment` / `refund` - Request processors
//! - `balance_store` - Per-account balances with atomic mutation
//! - `ledger` - Append-only transaction log
//! - `idempotency` - Duplicate request suppression
//! - `query` - History pagination and stats
//! - `batch_processor` - Account-partitioned parallel batch application

pub mod balance_store;
pub mod batch_processor;
pub mod card_validator;
pub mod clock;
pub mod idempotency;
pub mod ledger;
pub mod payment;
pub mod query;
pub mod refund;
pub mod retry;
pub mod service;
pub mod traits;

pub use balance_store::BalanceStore;
pub use batch_processor::{apply_command, BatchProcessor, ProcessingResult};
pub use clock::{ManualClock, SystemClock};
pub use idempotency::IdempotencyGuard;
pub use ledger::{HistoryIter, TransactionLedger};
pub use payment::PaymentProcessor;
pub use query::{HistoryCursor, HistoryPage, PageRequest, QueryService, StatsScope, TransactionStats};
pub use refund::RefundProcessor;
pub use service::LedgerService;
pub use traits::{Caller, Clock, TransactionService};
