//! Batch processing with account-based partitioning
//!
//! This module provides the `BatchProcessor`, which applies a batch of replay
//! commands to a [`TransactionService`] with commands for different accounts
//! running in parallel and commands for the same account running in order.
//!
//! # Design
//!
//! A batch is partitioned by the account each command touches. Every
//! partition runs on its own blocking task (the service synchronizes with
//! `parking_lot` locks and may back off with `thread::sleep`, so it must not
//! run on async worker threads). Results are returned in input order.
//!
//! # Thread Safety
//!
//! The processor is cloneable and can be shared across tasks; it only holds
//! an `Arc` to the service.

use super::traits::TransactionService;
use crate::types::{AccountId, Command, CommandOutcome, LedgerError};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of applying a single command
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// The command that was applied
    pub command: Command,

    /// The receipt, or why the command was rejected
    pub result: Result<CommandOutcome, LedgerError>,
}

/// Apply one command to a service
pub fn apply_command(
    service: &dyn TransactionService,
    command: &Command,
) -> Result<CommandOutcome, LedgerError> {
    match command {
        Command::Payment(request) => service
            .create_payment(request.clone())
            .map(CommandOutcome::Payment),
        Command::Refund(request) => service
            .create_refund(request.clone())
            .map(CommandOutcome::Refund),
    }
}

/// Batch processor with account-based partitioning
#[derive(Clone)]
pub struct BatchProcessor {
    service: Arc<dyn TransactionService>,
}

impl BatchProcessor {
    pub fn new(service: Arc<dyn TransactionService>) -> Self {
        Self { service }
    }

    /// Group commands by account, keeping each group in input order
    ///
    /// Each command is paired with its position in the batch. Commands that
    /// name no account share one partition.
    pub fn partition_by_account(
        &self,
        batch: Vec<Command>,
    ) -> HashMap<Option<AccountId>, Vec<(usize, Command)>> {
        let mut partitions: HashMap<Option<AccountId>, Vec<(usize, Command)>> = HashMap::new();
        for (index, command) in batch.into_iter().enumerate() {
            partitions
                .entry(command.account_id())
                .or_default()
                .push((index, command));
        }
        partitions
    }

    /// Apply one partition sequentially
    pub fn process_partition(&self, commands: Vec<(usize, Command)>) -> Vec<(usize, ProcessingResult)> {
        commands
            .into_iter()
            .map(|(index, command)| {
                let result = apply_command(self.service.as_ref(), &command);
                if let Err(error) = &result {
                    tracing::warn!(order_id = command.order_id(), code = error.code(), %error, "command rejected");
                }
                (index, ProcessingResult { command, result })
            })
            .collect()
    }

    /// Apply a batch, partitions in parallel
    ///
    /// # Returns
    ///
    /// One result per command, in input order. Commands of a partition whose
    /// task panicked are missing.
    pub async fn process_batch(&self, batch: Vec<Command>) -> Vec<ProcessingResult> {
        let partitions = self.partition_by_account(batch);

        let mut tasks = Vec::with_capacity(partitions.len());
        for (account, commands) in partitions {
            let processor = self.clone();
            let task = tokio::task::spawn_blocking(move || processor.process_partition(commands));
            tasks.push((account, task));
        }

        let mut results = Vec::new();
        for (account, task) in tasks {
            match task.await {
                Ok(partition_results) => results.extend(partition_results),
                Err(e) => {
                    tracing::error!(?account, error = %e, "partition task failed");
                }
            }
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
