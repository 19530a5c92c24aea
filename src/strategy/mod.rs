//! Replay strategies
//!
//! A replay loads opening account states, runs a commands CSV file through a
//! [`LedgerService`], and writes the final balances (and optionally the
//! ledger) as CSV. The strategy decides how commands are read and scheduled:
//! sequentially, or in batches partitioned by account.

use crate::cli::StrategyType;
use crate::config::LedgerConfig;
use crate::core::LedgerService;
use crate::io::{read_accounts, write_accounts_csv, write_ledger_csv};
use crate::types::{CommandOutcome, LedgerError};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub mod r#async;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use sync::SyncProcessingStrategy;

/// Counts of what happened to the rows of a commands file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Commands the service accepted (replays included)
    pub applied: u64,

    /// Commands the service rejected
    pub rejected: u64,

    /// Rows that could not be parsed into a command
    pub skipped: u64,
}

impl ReplaySummary {
    pub fn record(&mut self, result: &Result<CommandOutcome, LedgerError>) {
        match result {
            Ok(_) => self.applied += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

/// Processing strategy for replaying a commands file
pub trait ProcessingStrategy: Send + Sync {
    /// Apply every command in `input_path` to `service`
    ///
    /// Row and command errors are logged and counted, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions: the file cannot be
    /// opened or read, or the runtime cannot be started.
    fn replay(
        &self,
        service: Arc<LedgerService>,
        input_path: &Path,
    ) -> Result<ReplaySummary, LedgerError>;
}

/// Create a processing strategy based on the specified strategy type
///
/// `config` is only used by the async strategy; `None` means defaults.
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<BatchConfig>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::default()),
        StrategyType::Async => {
            let config = config.unwrap_or_default();
            Box::new(AsyncProcessingStrategy::new(config))
        }
    }
}

/// Run a complete replay from files
///
/// # Arguments
///
/// * `strategy` - How to read and schedule the commands
/// * `config` - Service configuration
/// * `accounts_path` - Opening account states
/// * `commands_path` - Commands to replay
/// * `output` - Receives the final account states
/// * `ledger_output` - Receives the full ledger, if requested
///
/// # Errors
///
/// Returns the first fatal error: an unreadable or invalid accounts file, a
/// duplicate account id, an unreadable commands file, or a failed write.
pub fn replay_files(
    strategy: &dyn ProcessingStrategy,
    config: LedgerConfig,
    accounts_path: &Path,
    commands_path: &Path,
    output: &mut dyn Write,
    ledger_output: Option<&mut dyn Write>,
) -> Result<ReplaySummary, LedgerError> {
    let service = Arc::new(LedgerService::new(config));
    for account in read_accounts(accounts_path)? {
        service.open_account(account)?;
    }
    tracing::info!(accounts = service.accounts().len(), "accounts loaded");

    let summary = strategy.replay(Arc::clone(&service), commands_path)?;
    tracing::info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "replay finished"
    );

    write_accounts_csv(&service.accounts(), output)?;
    if let Some(ledger_output) = ledger_output {
        write_ledger_csv(&service.ledger().snapshot(), ledger_output)?;
    }
    Ok(summary)
}
