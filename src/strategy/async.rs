//! Asynchronous batch replay strategy
//!
//! Reads commands in batches and applies each batch with account-based
//! partitioning, so different accounts replay in parallel.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent_batches)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (account partitioning + blocking tasks)
//!         └── Arc<LedgerService>
//! ```
//!
//! # Ordering
//!
//! - Batches are processed one after another, so an account's commands keep
//!   their file order even when they span batches
//! - Within a batch, each account's commands run in order on one task
//! - Different accounts run concurrently, bounded by `max_concurrent_batches`

use crate::core::BatchProcessor;
use crate::core::LedgerService;
use crate::io::async_reader::AsyncReader;
use crate::strategy::{ProcessingStrategy, ReplaySummary};
use crate::types::LedgerError;
use std::path::Path;
use std::sync::Arc;

/// Configuration for batch processing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of commands per batch
    pub batch_size: usize,

    /// Maximum number of account partitions processing concurrently
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a BatchConfig with custom values
    ///
    /// Zero values fall back to the defaults with a warning.
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            tracing::warn!(
                batch_size,
                default = default.batch_size,
                "invalid batch_size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            tracing::warn!(
                max_concurrent_batches,
                default = default.max_concurrent_batches,
                "invalid max_concurrent_batches, using default"
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

/// Batched, parallel replay
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
}

impl AsyncProcessingStrategy {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    /// Replay the commands file batch by batch
    ///
    /// Builds its own multi-threaded tokio runtime; must not be called from
    /// within another runtime.
    fn replay(
        &self,
        service: Arc<LedgerService>,
        input_path: &Path,
    ) -> Result<ReplaySummary, LedgerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_batches)
            .max_blocking_threads(self.config.max_concurrent_batches)
            .build()
            .map_err(|e| LedgerError::Io {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        runtime.block_on(async {
            let processor = BatchProcessor::new(service.clone());

            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| LedgerError::Io {
                    message: format!("Failed to open file '{}': {}", input_path.display(), e),
                })?;
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);

            let mut summary = ReplaySummary::default();
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                tracing::debug!(size = batch.len(), "processing batch");
                for processed in processor.process_batch(batch).await {
                    summary.record(&processed.result);
                }
                service.purge_expired();
            }
            summary.skipped = reader.skipped();

            Ok(summary)
        })
    }
}
