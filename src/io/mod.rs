//! I/O module
//!
//! Handles CSV parsing and output for the replay CLI.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (row conversion, output serialization)
//! - `sync_reader` - Synchronous command iterator and account loader
//! - `async_reader` - Asynchronous command reader with batch interface

pub mod async_reader;
pub mod csv_format;
pub mod sync_reader;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_account_row, convert_command_row, write_accounts_csv, write_ledger_csv, AccountRow,
    CommandRow,
};
pub use sync_reader::{read_accounts, SyncReader};
