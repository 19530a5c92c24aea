//! Synchronous CSV readers
//!
//! Provides a streaming iterator over replay commands and a loader for the
//! opening account states. Delegates format concerns to the csv_format module.
//!
//! # Iterator Interface
//!
//! `SyncReader` implements `Iterator`, yielding `Result<Command, LedgerError>`
//! for each CSV row:
//!
//! ```no_run
//! use transaction_ledger::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::new(Path::new("commands.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(command) => println!("Replaying order {}", command.order_id()),
//!         Err(e) => eprintln!("Skipping row: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual row errors are yielded as `Err` items carrying the line number
//!
//! # Memory Efficiency
//!
//! Commands are read one row at a time; the file is never loaded whole.

use crate::io::csv_format::{convert_account_row, convert_command_row, AccountRow, CommandRow};
use crate::types::{Account, Command, LedgerError};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Streaming reader over a commands CSV file
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,

    /// Data rows consumed so far (the header is line 1)
    line_num: u64,
}

impl SyncReader {
    /// Open a commands file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let file = open(path)?;
        Ok(Self {
            reader: builder().from_reader(file),
            line_num: 0,
        })
    }
}

impl Iterator for SyncReader {
    type Item = Result<Command, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CommandRow>();
        let row = deserializer.next()?;
        self.line_num += 1;
        let line = self.line_num + 1;

        Some(
            row.map_err(|e| {
                if e.is_io_error() {
                    LedgerError::from(e)
                } else {
                    LedgerError::parse(Some(line), e.to_string())
                }
            })
            .and_then(convert_command_row)
                .map_err(|e| match e {
                    LedgerError::Parse { line: None, message } => LedgerError::parse(Some(line), message),
                    other => other,
                }),
        )
    }
}

/// Load opening account states
///
/// Unlike commands, a bad account row aborts the load: replaying against a
/// partially loaded account set would produce misleading balances.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, or the first row error with its
/// line number.
pub fn read_accounts(path: &Path) -> Result<Vec<Account>, LedgerError> {
    let mut reader = builder().from_reader(open(path)?);

    reader
        .deserialize::<AccountRow>()
        .enumerate()
        .map(|(index, row)| {
            let line = index as u64 + 2;
            row.map_err(LedgerError::from)
                .and_then(convert_account_row)
                .map_err(|e| match e {
                    LedgerError::Parse { line: None, message } => LedgerError::parse(Some(line), message),
                    LedgerError::Io { .. } => e,
                    other => LedgerError::parse(Some(line), other.to_string()),
                })
        })
        .collect()
}

fn open(path: &Path) -> Result<File, LedgerError> {
    File::open(path).map_err(|e| LedgerError::Io {
        message: format!("Failed to open file '{}': {}", path.display(), e),
    })
}

fn builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .trim(Trim::All)
        .flexible(true)
        .buffer_capacity(8 * 1024);
    builder
}
