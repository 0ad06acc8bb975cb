//! Retry policies — decide whether a finished attempt is retried, and when.
//!
//! The dispatcher only talks to the [`RetryPolicy`] trait, so a stricter
//! strategy can be swapped in without touching the state machine.

use std::sync::Arc;
use std::time::Duration;

use courier_common::config::{AppConfig, RetryBackoff};
use courier_common::error::AppError;
use courier_common::types::DeliveryStatus;

/// Default maximum attempts per notification.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// What to do after an attempt has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { delay: Duration },
    /// Stop; the record settles in the given status.
    Terminal(DeliveryStatus),
}

impl RetryDecision {
    pub fn should_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }

    pub fn delay(&self) -> Duration {
        match self {
            RetryDecision::Retry { delay } => *delay,
            RetryDecision::Terminal(_) => Duration::ZERO,
        }
    }

    pub fn terminal_status(&self) -> Option<DeliveryStatus> {
        match self {
            RetryDecision::Retry { .. } => None,
            RetryDecision::Terminal(status) => Some(*status),
        }
    }
}

/// Strategy deciding retry/stop after each attempt.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Upper bound on attempts for one notification. Always at least 1.
    fn max_attempts(&self) -> u32;

    /// Delay before the attempt following `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration;

    /// Decide what happens after `attempt` (1-based) finished with `outcome`.
    fn decide(&self, attempt: u32, outcome: AttemptOutcome) -> RetryDecision {
        match outcome {
            AttemptOutcome::Success => RetryDecision::Terminal(DeliveryStatus::Sent),
            AttemptOutcome::Failure if attempt < self.max_attempts() => RetryDecision::Retry {
                delay: self.delay_after(attempt),
            },
            AttemptOutcome::Failure => RetryDecision::Terminal(DeliveryStatus::Failed),
        }
    }
}

fn check_max_attempts(max_attempts: u32) -> Result<(), AppError> {
    if max_attempts == 0 {
        return Err(AppError::Config(
            "max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Constant delay between attempts.
#[derive(Debug, Clone)]
pub struct FixedDelayPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl FixedDelayPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self, AppError> {
        check_max_attempts(max_attempts)?;
        Ok(Self {
            max_attempts,
            base_delay,
        })
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

impl Default for FixedDelayPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_after(&self, _attempt: u32) -> Duration {
        self.base_delay
    }
}

/// Doubling delay, `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, AppError> {
        check_max_attempts(max_attempts)?;
        if max_delay < base_delay {
            return Err(AppError::Config(format!(
                "retry max delay ({:?}) must not be below the base delay ({:?})",
                max_delay, base_delay
            )));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
        })
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Build the configured retry policy.
///
/// Invalid parameters are reported here, at startup, never during dispatch.
pub fn build_policy(config: &AppConfig) -> Result<Arc<dyn RetryPolicy>, AppError> {
    let policy: Arc<dyn RetryPolicy> = match config.retry_backoff {
        RetryBackoff::Fixed => Arc::new(FixedDelayPolicy::new(
            config.max_attempts,
            config.retry_delay(),
        )?),
        RetryBackoff::Exponential => Arc::new(ExponentialBackoffPolicy::new(
            config.max_attempts,
            config.retry_delay(),
            config.retry_max_delay(),
        )?),
    };

    tracing::info!(
        backoff = ?config.retry_backoff,
        max_attempts = config.max_attempts,
        base_delay_ms = config.retry_delay_ms,
        "Retry policy configured"
    );

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_terminal_sent() {
        let policy = FixedDelayPolicy::default();
        for attempt in 1..=3 {
            let decision = policy.decide(attempt, AttemptOutcome::Success);
            assert_eq!(decision, RetryDecision::Terminal(DeliveryStatus::Sent));
            assert!(!decision.should_retry());
        }
    }

    #[test]
    fn test_failure_retries_until_exhausted() {
        let policy = FixedDelayPolicy::default();

        let first = policy.decide(1, AttemptOutcome::Failure);
        assert!(first.should_retry());
        assert_eq!(first.delay(), Duration::from_millis(500));
        assert_eq!(first.terminal_status(), None);

        assert!(policy.decide(2, AttemptOutcome::Failure).should_retry());

        let last = policy.decide(3, AttemptOutcome::Failure);
        assert_eq!(last.terminal_status(), Some(DeliveryStatus::Failed));
        assert_eq!(last.delay(), Duration::ZERO);
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = FixedDelayPolicy::new(1, Duration::from_millis(10)).unwrap();
        assert_eq!(
            policy.decide(1, AttemptOutcome::Failure),
            RetryDecision::Terminal(DeliveryStatus::Failed)
        );
    }

    #[test]
    fn test_zero_max_attempts_is_config_error() {
        assert!(matches!(
            FixedDelayPolicy::new(0, Duration::from_millis(500)),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            ExponentialBackoffPolicy::new(0, Duration::from_millis(500), Duration::from_secs(5)),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let policy = ExponentialBackoffPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        )
        .unwrap();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_build_policy_from_config() {
        let config = AppConfig {
            max_attempts: 4,
            retry_backoff: RetryBackoff::Exponential,
            ..AppConfig::default()
        };
        let policy = build_policy(&config).unwrap();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));

        let broken = AppConfig {
            max_attempts: 0,
            ..AppConfig::default()
        };
        assert!(matches!(build_policy(&broken), Err(AppError::Config(_))));
    }
}
