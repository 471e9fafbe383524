/// Retry policy with exponential backoff and jitter
///
/// Stateless decision function: given the attempt number and the failure
/// class, answer "wait this long and try again" or "give up". The caller
/// owns the attempt counter and the sleep.
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Classification of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Will never succeed on retry (corrupt payload, unsupported version)
    Permanent,
    /// May succeed later (backend unreachable, timeout)
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff duration, also the jitter window
    pub base: Duration,
    /// Cap applied to the exponential backoff
    pub max_delay: Duration,
    /// Transient failures allowed before giving up
    pub max_attempts: u32,
    /// Add random jitter in [0, base) to spread synchronized retries
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            jitter: true,
        }
    }

    /// Decide what to do after the failure of `attempt` (0-based).
    pub fn next(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Permanent => RetryDecision::GiveUp,
            ErrorKind::Transient => {
                if attempt >= self.max_attempts {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "retry budget exhausted"
                    );
                    return RetryDecision::GiveUp;
                }
                RetryDecision::RetryAfter(self.backoff(attempt))
            }
        }
    }

    /// `base * 2^attempt` capped at `max_delay`, plus jitter in `[0, base)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let capped = exp.min(self.max_delay.as_millis() as u64);

        let jitter_ms = if self.jitter && base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };

        Duration::from_millis(capped + jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts,
            jitter: false,
        }
    }

    #[test]
    fn test_permanent_gives_up_immediately() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next(0, ErrorKind::Permanent), RetryDecision::GiveUp);
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let policy = policy_without_jitter(10);

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy_without_jitter(10);

        assert_eq!(policy.backoff(8), Duration::from_secs(1));
        assert_eq!(policy.backoff(30), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_exhausts_budget() {
        let policy = policy_without_jitter(3);

        // Retries are granted for attempts 0..max_attempts, so a failure
        // is retried max_attempts times before giving up.
        assert!(matches!(
            policy.next(0, ErrorKind::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            policy.next(2, ErrorKind::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.next(3, ErrorKind::Transient), RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(300));
        }
    }

    #[test]
    fn test_overflow_safe_attempt() {
        let policy = policy_without_jitter(u32::MAX);

        // 2^attempt overflows u64 well before this; the cap must still hold
        assert_eq!(policy.backoff(200), Duration::from_secs(1));
    }
}
