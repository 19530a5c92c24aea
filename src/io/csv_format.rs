//! CSV format handling for replay input and ledger output
//!
//! This module centralizes all CSV format concerns, providing:
//! - `AccountRow` and `CommandRow` structures for deserialization
//! - Conversion from rows to accounts and service commands
//! - Account and ledger output serialization
//!
//! All functions are pure (no file I/O) for easy testing.

use crate::types::{
    Account, AccountId, AccountStatus, Command, FundingSource, LedgerError, PaymentRequest,
    RefundRequest, TransactionRecord,
};
use chrono::SecondsFormat;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// One row of the accounts file
///
/// Columns: account, wallet_balance, card_balance, status. `status` may be
/// omitted and defaults to active.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountRow {
    pub account: AccountId,
    pub wallet_balance: String,
    pub card_balance: String,
    pub status: Option<String>,
}

/// One row of the commands file
///
/// Columns: type, account, order, amount, card, cvv, source, key. Card and
/// CVV are only read for payments; `source` and `key` are optional.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandRow {
    #[serde(rename = "type")]
    pub kind: String,
    pub account: AccountId,
    pub order: String,
    pub amount: String,
    pub card: Option<String>,
    pub cvv: Option<String>,
    pub source: Option<String>,
    pub key: Option<String>,
}

/// Convert an `AccountRow` into an opening account state
///
/// # Errors
///
/// Returns `Parse` for unreadable numbers or an unknown status, and the
/// balance validation errors of [`Account::with_balances`].
pub fn convert_account_row(row: AccountRow) -> Result<Account, LedgerError> {
    let wallet = parse_decimal(&row.wallet_balance, "wallet_balance", row.account)?;
    let card = parse_decimal(&row.card_balance, "card_balance", row.account)?;

    let mut account = Account::with_balances(row.account, wallet, card)?;
    if let Some(status) = non_empty(row.status.as_deref()) {
        account.status = match status.to_lowercase().as_str() {
            "active" => AccountStatus::Active,
            "frozen" => AccountStatus::Frozen,
            "disabled" => AccountStatus::Disabled,
            _ => {
                return Err(LedgerError::parse(
                    None,
                    format!("invalid status '{}' for account {}", status, row.account),
                ))
            }
        };
    }
    Ok(account)
}

/// Convert a `CommandRow` into a service command
///
/// The amount is parsed as written, keeping its scale; whether it carries
/// exactly five decimal places is decided by the processors.
///
/// # Errors
///
/// Returns `Parse` for an unknown type or source, an unreadable amount, or a
/// payment row without card or CVV.
pub fn convert_command_row(row: CommandRow) -> Result<Command, LedgerError> {
    let amount = parse_decimal(&row.amount, "amount", row.account)?;
    let key = non_empty(row.key.as_deref()).map(str::to_string);

    match row.kind.to_lowercase().as_str() {
        "payment" => {
            let card = non_empty(row.card.as_deref()).ok_or_else(|| {
                LedgerError::parse(None, format!("payment for order '{}' requires a card", row.order))
            })?;
            let cvv = non_empty(row.cvv.as_deref()).ok_or_else(|| {
                LedgerError::parse(None, format!("payment for order '{}' requires a cvv", row.order))
            })?;
            let source = match non_empty(row.source.as_deref()) {
                Some(source) => parse_source(source)?,
                None => FundingSource::default(),
            };

            let mut request = PaymentRequest::new(card, cvv, amount, row.order, row.account)
                .with_source(source);
            request.idempotency_key = key;
            Ok(Command::Payment(request))
        }
        "refund" => {
            let mut request = RefundRequest::new(row.order, amount).for_account(row.account);
            request.idempotency_key = key;
            Ok(Command::Refund(request))
        }
        _ => Err(LedgerError::parse(
            None,
            format!("invalid command type '{}' for order '{}'", row.kind, row.order),
        )),
    }
}

fn parse_decimal(value: &str, field: &str, account: AccountId) -> Result<Decimal, LedgerError> {
    Decimal::from_str(value.trim()).map_err(|_| {
        LedgerError::parse(
            None,
            format!("invalid {} '{}' for account {}", field, value, account),
        )
    })
}

fn parse_source(value: &str) -> Result<FundingSource, LedgerError> {
    match value.to_lowercase().as_str() {
        "wallet" => Ok(FundingSource::Wallet),
        "card" => Ok(FundingSource::Card),
        _ => Err(LedgerError::parse(
            None,
            format!("invalid funding source '{}'", value),
        )),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Write account states to CSV format
///
/// Writes accounts with columns: account, wallet_balance, card_balance,
/// status. Accounts are sorted by id for deterministic output and balances
/// are printed with five decimal places.
///
/// # Errors
///
/// Returns `Io` if the output cannot be written.
pub fn write_accounts_csv(accounts: &[Account], output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record(["account", "wallet_balance", "card_balance", "status"])?;

    let mut sorted_accounts = accounts.to_vec();
    sorted_accounts.sort_by_key(|account| account.account_id);

    for account in sorted_accounts {
        writer.write_record(&[
            account.account_id.to_string(),
            format!("{:.5}", account.wallet_balance),
            format!("{:.5}", account.card_balance),
            account.status.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write ledger entries to CSV format, in the order given
///
/// Columns: kind, id, order, account, payment, amount, source,
/// card_last_four, status, created_at. `payment` is the refunded payment's id
/// and empty for payments; `card_last_four` is empty for refunds.
pub fn write_ledger_csv(
    entries: &[TransactionRecord],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "kind",
        "id",
        "order",
        "account",
        "payment",
        "amount",
        "source",
        "card_last_four",
        "status",
        "created_at",
    ])?;

    for entry in entries {
        let row = match entry {
            TransactionRecord::Payment(payment) => [
                "payment".to_string(),
                payment.transaction_id.to_string(),
                payment.order_id.clone(),
                payment.account_id.to_string(),
                String::new(),
                payment.amount.to_string(),
                payment.source.to_string(),
                payment.card_last_four.clone(),
                payment.status.to_string(),
                payment.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
            TransactionRecord::Refund(refund) => [
                "refund".to_string(),
                refund.refund_id.to_string(),
                refund.order_id.clone(),
                refund.account_id.to_string(),
                refund.payment_transaction_id.to_string(),
                refund.amount.to_string(),
                refund.source.to_string(),
                String::new(),
                refund.status.to_string(),
                refund.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        };
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
