use crate::config::LedgerConfig;
use crate::strategy::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Replay payment and refund commands against opening account balances
#[derive(Parser, Debug)]
#[command(name = "transaction-ledger")]
#[command(about = "Replay payment and refund commands against a transaction ledger", long_about = None)]
pub struct CliArgs {
    /// Commands CSV file (payments and refunds)
    #[arg(value_name = "COMMANDS", help = "Path to the commands CSV file")]
    pub commands_file: PathBuf,

    /// Opening account states
    #[arg(
        long = "accounts",
        value_name = "FILE",
        help = "Path to the accounts CSV file with opening balances"
    )]
    pub accounts_file: PathBuf,

    /// Replay strategy
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Replay strategy: 'sync' for sequential or 'async' for account-parallel batches"
    )]
    pub strategy: StrategyType,

    /// Number of commands per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of commands per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of concurrent partitions (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of account partitions processing concurrently (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// Where to write the full ledger
    #[arg(
        long = "ledger-out",
        value_name = "FILE",
        help = "Also write every ledger entry to this CSV file"
    )]
    pub ledger_out: Option<PathBuf>,

    #[arg(
        long = "reservation-timeout-secs",
        value_name = "SECS",
        help = "Seconds before an abandoned idempotency reservation may be taken over (default: 30)"
    )]
    pub reservation_timeout_secs: Option<u64>,

    #[arg(
        long = "max-retries",
        value_name = "COUNT",
        help = "Internal retries for transient concurrency errors (default: 3)"
    )]
    pub max_retries: Option<u32>,

    /// Log level filter; RUST_LOG overrides it
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs")]
    pub json_logs: bool,
}

/// Available replay strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing values fall back to defaults; zero values are replaced by
    /// defaults with a warning.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(default.max_concurrent_batches),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Create the service configuration, overriding defaults with any flags given
    pub fn to_ledger_config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::default();
        if let Some(secs) = self.reservation_timeout_secs {
            config = config.with_reservation_timeout(Duration::from_secs(secs));
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Strategy parsing tests
    #[rstest]
    #[case::default_strategy(&["program", "--accounts", "a.csv", "cmds.csv"], StrategyType::Async)]
    #[case::explicit_sync(&["program", "--accounts", "a.csv", "--strategy", "sync", "cmds.csv"], StrategyType::Sync)]
    #[case::explicit_async(&["program", "--strategy", "async", "--accounts", "a.csv", "cmds.csv"], StrategyType::Async)]
    fn test_strategy_parsing(#[case] args: &[&str], #[case] expected: StrategyType) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.strategy, expected);
    }

    #[test]
    fn test_paths_and_defaults() {
        let parsed = CliArgs::try_parse_from(["program", "--accounts", "a.csv", "cmds.csv"]).unwrap();

        assert_eq!(parsed.commands_file, PathBuf::from("cmds.csv"));
        assert_eq!(parsed.accounts_file, PathBuf::from("a.csv"));
        assert_eq!(parsed.ledger_out, None);
        assert_eq!(parsed.log_level, "info");
        assert!(!parsed.json_logs);
    }

    // BatchConfig conversion tests with valid values
    #[rstest]
    #[case::all_defaults(&["program", "--accounts", "a.csv", "cmds.csv"], 1000, num_cpus::get())]
    #[case::custom_batch_size(&["program", "--accounts", "a.csv", "--batch-size", "2000", "cmds.csv"], 2000, num_cpus::get())]
    #[case::custom_max_concurrent(&["program", "--accounts", "a.csv", "--max-concurrent", "8", "cmds.csv"], 1000, 8)]
    #[case::zero_batch_size(&["program", "--accounts", "a.csv", "--batch-size", "0", "cmds.csv"], 1000, num_cpus::get())]
    #[case::zero_max_concurrent(&["program", "--accounts", "a.csv", "--max-concurrent", "0", "cmds.csv"], 1000, num_cpus::get())]
    fn test_batch_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: usize,
        #[case] expected_max_concurrent: usize,
    ) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        let config = parsed.to_batch_config();

        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent_batches, expected_max_concurrent);
    }

    #[test]
    fn test_ledger_config_overrides() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--accounts",
            "a.csv",
            "--reservation-timeout-secs",
            "5",
            "--max-retries",
            "0",
            "cmds.csv",
        ])
        .unwrap();

        let config = parsed.to_ledger_config();

        assert_eq!(config.reservation_timeout, Duration::from_secs(5));
        assert_eq!(config.in_flight_wait, Duration::from_secs(5));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.failure_retention, LedgerConfig::default().failure_retention);
    }

    // Error handling tests
    #[rstest]
    #[case::missing_commands(&["program", "--accounts", "a.csv"])]
    #[case::missing_accounts(&["program", "cmds.csv"])]
    #[case::invalid_strategy(&["program", "--accounts", "a.csv", "--strategy", "invalid", "cmds.csv"])]
    #[case::negative_retries(&["program", "--accounts", "a.csv", "--max-retries", "-1", "cmds.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        let result = CliArgs::try_parse_from(args);
        assert!(result.is_err());
    }
}
