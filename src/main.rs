//! Transaction Ledger CLI
//!
//! Replays payment and refund commands from a CSV file against opening
//! account balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --accounts accounts.csv commands.csv > balances.csv
//! cargo run -- --accounts accounts.csv --strategy sync commands.csv > balances.csv
//! cargo run -- --accounts accounts.csv --ledger-out ledger.csv commands.csv > balances.csv
//! cargo run -- --accounts accounts.csv --batch-size 2000 --max-concurrent 8 commands.csv
//! ```
//!
//! Final account states go to stdout; logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success (rejected or malformed commands are logged, not fatal)
//! - 1: Error (missing arguments, unreadable or invalid input, write failure)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;
use transaction_ledger::cli;
use transaction_ledger::logging;
use transaction_ledger::strategy;

fn main() {
    let args = cli::parse_args();

    if let Err(e) = logging::init_logging(&args.log_level, args.json_logs) {
        eprintln!("Error: failed to initialize logging: {}", e);
        process::exit(1);
    }

    let strategy = {
        let config = if args.strategy == cli::StrategyType::Async {
            Some(args.to_batch_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy, config)
    };

    let mut ledger_file = match &args.ledger_out {
        Some(path) => match File::create(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot create ledger output");
                process::exit(1);
            }
        },
        None => None,
    };

    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    let result = strategy::replay_files(
        strategy.as_ref(),
        args.to_ledger_config(),
        &args.accounts_file,
        &args.commands_file,
        &mut output,
        ledger_file.as_mut().map(|w| w as &mut dyn Write),
    );

    if let Err(e) = result {
        tracing::error!(code = e.code(), error = %e, "replay failed");
        process::exit(1);
    }

    if let Some(mut file) = ledger_file {
        if let Err(e) = file.flush() {
            tracing::error!(error = %e, "failed to flush ledger output");
            process::exit(1);
        }
    }
}
