//! Synchronous replay strategy
//!
//! Streams commands one row at a time through `SyncReader` and applies each
//! to the service before reading the next, so the replay is fully
//! deterministic in input order.
//!
//! # Memory Efficiency
//!
//! Rows are never buffered: memory grows with the ledger, not with the size
//! of the commands file. Expired idempotency entries are purged every
//! `purge_interval` commands.

use crate::core::{apply_command, LedgerService};
use crate::io::sync_reader::SyncReader;
use crate::strategy::{ProcessingStrategy, ReplaySummary};
use crate::types::LedgerError;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_PURGE_INTERVAL: usize = 1000;

/// Sequential, single-threaded replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProcessingStrategy {
    purge_interval: usize,
}

impl Default for SyncProcessingStrategy {
    fn default() -> Self {
        Self {
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl SyncProcessingStrategy {
    /// Purge expired idempotency entries every `purge_interval` commands
    ///
    /// Zero falls back to the default with a warning.
    pub fn new(purge_interval: usize) -> Self {
        if purge_interval == 0 {
            tracing::warn!(
                purge_interval,
                default = DEFAULT_PURGE_INTERVAL,
                "invalid purge_interval, using default"
            );
            return Self::default();
        }
        Self { purge_interval }
    }
}

impl ProcessingStrategy for SyncProcessingStrategy {
    fn replay(
        &self,
        service: Arc<LedgerService>,
        input_path: &Path,
    ) -> Result<ReplaySummary, LedgerError> {
        let reader = SyncReader::new(input_path)?;
        let mut summary = ReplaySummary::default();

        for (index, row) in reader.enumerate() {
            if index > 0 && index % self.purge_interval == 0 {
                service.purge_expired();
            }
            match row {
                Ok(command) => {
                    let result = apply_command(&*service, &command);
                    if let Err(error) = &result {
                        tracing::warn!(
                            order_id = command.order_id(),
                            code = error.code(),
                            %error,
                            "command rejected"
                        );
                    }
                    summary.record(&result);
                }
                Err(LedgerError::Io { message }) => return Err(LedgerError::Io { message }),
                Err(error) => {
                    summary.skipped += 1;
                    tracing::warn!(%error, "skipping command row");
                }
            }
        }

        Ok(summary)
    }
}
