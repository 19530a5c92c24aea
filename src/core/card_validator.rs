//! Structural card validation
//!
//! Pure functions that check a card number and CVV before any account lock is
//! taken. Validation is structural only: a number that passes is well-formed,
//! not necessarily a real payment instrument.

use crate::types::CardValidationError;

/// Number of digits in an accepted card number
pub const CARD_NUMBER_LENGTH: usize = 16;

/// Validate a card number and return it normalized
///
/// Whitespace anywhere in the input is ignored (`"4111 1111 1111 1111"` is
/// accepted).
///
/// # Errors
///
/// Checks run in this order:
/// - `InvalidLength` unless the input holds exactly 16 digits
/// - `NonNumeric` if any non-digit, non-whitespace character remains
/// - `ChecksumFailed` if the Luhn checksum does not hold
pub fn validate_card_number(input: &str) -> Result<String, CardValidationError> {
    let stripped: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    let digit_count = stripped.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count != CARD_NUMBER_LENGTH {
        return Err(CardValidationError::InvalidLength);
    }
    if stripped.len() != digit_count {
        return Err(CardValidationError::NonNumeric);
    }
    if !luhn_valid(&stripped) {
        return Err(CardValidationError::ChecksumFailed);
    }

    Ok(stripped)
}

/// Validate a CVV and return it trimmed
///
/// # Errors
///
/// - `InvalidLength` unless the input is 3 or 4 characters long
/// - `NonNumeric` if any of those characters is not a digit
pub fn validate_cvv(input: &str) -> Result<String, CardValidationError> {
    let trimmed = input.trim();
    let length = trimmed.chars().count();
    if !(3..=4).contains(&length) {
        return Err(CardValidationError::InvalidLength);
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(CardValidationError::NonNumeric);
    }
    Ok(trimmed.to_string())
}

/// Last four digits of a normalized card number
pub fn last_four(normalized: &str) -> String {
    let start = normalized.len().saturating_sub(4);
    normalized[start..].to_string()
}

/// Luhn checksum over an all-digit string
fn luhn_valid(digits: &str) -> bool {
    luhn_sum(digits.bytes().rev().map(|b| u32::from(b - b'0')), false) % 10 == 0
}

// Sums digits from the right; `double_first` doubles the rightmost digit
fn luhn_sum(digits_from_right: impl Iterator<Item = u32>, double_first: bool) -> u32 {
    digits_from_right
        .enumerate()
        .map(|(i, digit)| {
            let doubled = (i % 2 == 1) != double_first;
            if doubled {
                let d = digit * 2;
                if d > 9 {
                    d - 9
                } else {
                    d
                }
            } else {
                digit
            }
        })
        .sum()
}

/// Compute the Luhn check digit to append to an all-digit payload
///
/// Used to build valid numbers for fixtures and tests.
pub fn luhn_check_digit(payload: &str) -> Option<u32> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sum = luhn_sum(payload.bytes().rev().map(|b| u32::from(b - b'0')), true);
    Some((10 - sum % 10) % 10)
}
