//! Fixed-point money amounts
//!
//! Every amount moving through the ledger is a `rust_decimal::Decimal` carrying
//! exactly five fractional digits. Binary floating point never appears in the
//! money path.

use super::error::LedgerError;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits carried by every amount and balance
pub const AMOUNT_SCALE: u32 = 5;

/// A positive money amount with exactly five decimal places
///
/// The only way to build an `Amount` is through [`Amount::new`] (or its
/// `TryFrom`/`FromStr` wrappers), so holding one proves the value passed the
/// precision and sign checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    /// Validate a decimal as a transaction amount
    ///
    /// # Errors
    ///
    /// - `PrecisionError` if the value is not expressed with exactly five
    ///   fractional digits (`49.999` and `49.9990000` are both rejected)
    /// - `InvalidAmount` if the value is zero or negative
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value.scale() != AMOUNT_SCALE {
            return Err(LedgerError::precision_error(value));
        }
        if value <= Decimal::ZERO {
            return Err(LedgerError::invalid_amount(value));
        }
        Ok(Self(value))
    }

    /// The underlying decimal value
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| LedgerError::parse(None, format!("invalid amount '{}': {}", s, e)))?;
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}", self.0)
    }
}

/// Bring a balance to the ledger's fixed scale
///
/// Opening balances may be written with fewer fractional digits (`100` or
/// `12.5`); they are widened to five places. Balances that would need
/// rounding are rejected with `PrecisionError` rather than silently rounded.
pub fn normalize_balance(value: Decimal) -> Result<Decimal, LedgerError> {
    if value.scale() > AMOUNT_SCALE {
        return Err(LedgerError::precision_error(value));
    }
    let mut normalized = value;
    normalized.rescale(AMOUNT_SCALE);
    Ok(normalized)
}
