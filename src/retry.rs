//! Bounded retry with a recovery action between attempts.
//!
//! Every upstream call (opening the search session, processing one entry)
//! goes through [`RetryPolicy::run`]. A failed attempt is classified with
//! [`ScraperError::is_retryable`]: fatal errors return immediately, retryable
//! ones trigger the [`Recovery`] strategy and another attempt, until the
//! attempt budget is spent and [`ScraperError::ExhaustedRetries`] is returned.

use crate::error::{Result, ScraperError};
use crate::recovery::{Recovery, RecoveryOutcome};
use async_trait::async_trait;
use tracing::{error, warn};

/// One retryable unit of work.
///
/// Implemented by small structs holding the state an attempt needs (for
/// example the result stream), so each attempt can borrow it mutably.
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    /// Run attempt number `attempt` (1-based).
    async fn attempt(&mut self, attempt: u32) -> Result<Self::Output>;
}

/// Shared attempt bound for all upstream operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts, at least one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempts allowed per operation
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts the budget.
    ///
    /// Recovery runs only when another attempt will follow. A recovery that
    /// returns [`RecoveryOutcome::Abort`] ends with [`ScraperError::Aborted`].
    pub async fn run<A: Attempt>(
        &self,
        operation: &str,
        op: &mut A,
        recovery: &dyn Recovery,
    ) -> Result<A::Output> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op.attempt(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max = self.max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        error!(operation, attempts = attempt, "Too many failed attempts");
                        return Err(ScraperError::ExhaustedRetries {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    if recovery.attempt_recovery().await == RecoveryOutcome::Abort {
                        return Err(ScraperError::Aborted);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: u32,
        fail_first: u32,
        error: fn() -> ScraperError,
    }

    #[async_trait]
    impl Attempt for Flaky {
        type Output = u32;

        async fn attempt(&mut self, attempt: u32) -> Result<u32> {
            self.calls += 1;
            if attempt <= self.fail_first {
                Err((self.error)())
            } else {
                Ok(attempt)
            }
        }
    }

    struct Counting {
        calls: AtomicU32,
        outcome: RecoveryOutcome,
    }

    impl Counting {
        fn new(outcome: RecoveryOutcome) -> Self {
            Self {
                calls: AtomicU32::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl Recovery for Counting {
        async fn attempt_recovery(&self) -> RecoveryOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn rate_limited() -> ScraperError {
        ScraperError::RateLimited(1)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() -> Result<()> {
        let mut op = Flaky { calls: 0, fail_first: 2, error: rate_limited };
        let recovery = Counting::new(RecoveryOutcome::Continue);
        let value = RetryPolicy::new(5).run("op", &mut op, &recovery).await?;
        assert_eq!(value, 3);
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let mut op = Flaky { calls: 0, fail_first: u32::MAX, error: rate_limited };
        let recovery = Counting::new(RecoveryOutcome::Continue);
        let result = RetryPolicy::new(4).run("open session", &mut op, &recovery).await;

        assert!(matches!(
            result,
            Err(ScraperError::ExhaustedRetries { attempts: 4, .. })
        ));
        assert_eq!(op.calls, 4);
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let mut op = Flaky {
            calls: 0,
            fail_first: u32::MAX,
            error: || ScraperError::AuthorSplit { authors: "A B".to_string() },
        };
        let recovery = Counting::new(RecoveryOutcome::Continue);
        let result = RetryPolicy::new(4).run("entry", &mut op, &recovery).await;

        assert!(matches!(result, Err(ScraperError::AuthorSplit { .. })));
        assert_eq!(op.calls, 1);
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_stops_immediately() {
        let mut op = Flaky { calls: 0, fail_first: u32::MAX, error: rate_limited };
        let recovery = Counting::new(RecoveryOutcome::Abort);
        let result = RetryPolicy::new(20).run("entry", &mut op, &recovery).await;

        assert!(matches!(result, Err(ScraperError::Aborted)));
        assert_eq!(op.calls, 1);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), 20);
    }
}
