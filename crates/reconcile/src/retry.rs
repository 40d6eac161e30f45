//! Constant-interval retry with bounded attempts, and the per-host deadline.
//!
//! All provider polling (instance lookup, wait-for-running) and the SSH dial
//! share the same shape: try, sleep a fixed interval, try again, give up
//! after a bounded number of attempts. The caller decides which errors are
//! worth retrying via a classifier.

use std::time::{Duration, Instant};

use log::info;

use crate::error::{Error, Result};

/// Absolute point in time after which a host's reconcile must stop.
///
/// Threads cannot be cancelled from outside, so the deadline is checked at
/// every blocking point: retry loops, provider polls, and between engine
/// steps. Expiry surfaces as [`Error::Timeout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Deadline(None)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    /// The underlying instant, when bounded.
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with [`Error::Timeout`] when the deadline has passed.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.expired() {
            return Err(Error::Timeout(what.to_string()));
        }
        Ok(())
    }
}

/// Configuration for a constant-interval retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Fixed sleep between attempts
    pub interval: Duration,
    /// Maximum number of attempts
    pub max_attempts: u32,
}

impl RetryConfig {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        RetryConfig {
            interval,
            max_attempts,
        }
    }
}

/// Execute `operation` until it succeeds, the classifier declares the error
/// permanent, the attempts are exhausted, or the deadline expires.
///
/// The last error is returned on exhaustion.
pub fn with_retry<T, F, C>(
    config: &RetryConfig,
    deadline: &Deadline,
    mut operation: F,
    retryable: C,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    C: Fn(&Error) -> bool,
{
    let mut last: Option<Error> = None;

    for attempt in 0..config.max_attempts {
        deadline.check("retry loop")?;

        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !retryable(&e) {
                    return Err(e);
                }
                if attempt + 1 >= config.max_attempts {
                    last = Some(e);
                    break;
                }
                info!(
                    "attempt {}/{} failed: {e}, retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    config.interval
                );
                std::thread::sleep(config.interval);
                last = Some(e);
            }
        }
    }

    Err(last.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick() -> RetryConfig {
        RetryConfig::new(Duration::from_millis(1), 3)
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&quick(), &Deadline::none(), || Ok(42), |e| e.is_retryable());
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_permanent_error_returns_immediately() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(
            &quick(),
            &Deadline::none(),
            || {
                attempts.set(attempts.get() + 1);
                Err(Error::AuthMissing("no token".to_string()))
            },
            |e| e.is_retryable(),
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(
            &quick(),
            &Deadline::none(),
            || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(Error::NoInstance("web-01".to_string()))
                } else {
                    Ok(attempts.get())
                }
            },
            |e| e.is_retryable(),
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_with_retry_exhaustion_returns_last_error() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(
            &quick(),
            &Deadline::none(),
            || {
                attempts.set(attempts.get() + 1);
                Err(Error::NoInstance("web-01".to_string()))
            },
            |e| e.is_retryable(),
        );
        assert!(matches!(result.unwrap_err(), Error::NoInstance(_)));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_expired_deadline_fails_with_timeout() {
        let deadline = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        let result = with_retry(&quick(), &deadline, || Ok(1), |e| e.is_retryable());
        assert!(matches!(result.unwrap_err(), Error::Timeout(_)));
    }

    #[test]
    fn test_deadline_none_never_expires() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::none().check("step").is_ok());
    }
}
