//! Bounded retry of transient failures

use crate::config::LedgerConfig;
use crate::types::LedgerError;
use std::thread;

/// Run `attempt` until it succeeds, fails permanently, or retries run out
///
/// Only errors whose [`LedgerError::is_transient`] holds are retried, with
/// linear backoff from [`LedgerConfig::backoff_for`]. The last error is
/// surfaced unchanged.
pub fn retry_transient<T, F>(config: &LedgerConfig, operation: &str, mut attempt: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Result<T, LedgerError>,
{
    let mut retries = 0;
    loop {
        match attempt() {
            Err(error) if error.is_transient() && retries < config.max_retries => {
                retries += 1;
                tracing::warn!(operation, retries, %error, "retrying after transient failure");
                thread::sleep(config.backoff_for(retries));
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_retries: u32) -> LedgerConfig {
        LedgerConfig {
            retry_backoff: Duration::from_millis(1),
            ..LedgerConfig::default()
        }
        .with_max_retries(max_retries)
    }

    #[test]
    fn test_transient_errors_are_retried_until_success() {
        let mut calls = 0;
        let result = retry_transient(&config(3), "test", || {
            calls += 1;
            if calls < 3 {
                Err(LedgerError::lock_timeout(1))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&config(2), "test", || {
            calls += 1;
            Err(LedgerError::request_in_flight("k"))
        });

        assert_eq!(result, Err(LedgerError::request_in_flight("k")));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&config(5), "test", || {
            calls += 1;
            Err(LedgerError::EmptyOrderId)
        });

        assert_eq!(result, Err(LedgerError::EmptyOrderId));
        assert_eq!(calls, 1);
    }
}
