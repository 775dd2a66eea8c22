//! Backend retry/backoff policy (§4.6 "Retry policy on failure").

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// delay(i) = min(base * 2^i, cap), for retry attempt `i` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(63));
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }

    /// Whether a transport error or the given status warrants a retry, and
    /// the delay to use if so. `retry_after` is the parsed `Retry-After`
    /// header value in seconds, when present on a 429 response.
    pub fn decide(&self, attempt: u32, status: Option<u16>, retry_after: Option<u64>) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        match status {
            None => Some(self.backoff(attempt)),
            Some(s) if (500..600).contains(&s) => Some(self.backoff(attempt)),
            Some(429) => retry_after.map(|secs| Duration::from_secs(secs).min(self.max_delay)),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10), Duration::from_secs(3));
    }

    #[test]
    fn retries_5xx_up_to_max_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.decide(0, Some(503), None).is_some());
        assert!(policy.decide(1, Some(503), None).is_some());
        assert!(policy.decide(2, Some(503), None).is_none());
    }

    #[test]
    fn retries_429_only_with_retry_after() {
        let policy = RetryPolicy::default();
        assert!(policy.decide(0, Some(429), None).is_none());
        assert_eq!(policy.decide(0, Some(429), Some(1)), Some(Duration::from_secs(1)));
    }

    #[test]
    fn retry_after_is_capped_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(0, Some(429), Some(100)), Some(Duration::from_secs(3)));
    }

    #[test]
    fn does_not_retry_other_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.decide(0, Some(404), None).is_none());
        assert!(policy.decide(0, Some(400), None).is_none());
    }

    #[test]
    fn retries_transport_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.decide(0, None, None).is_some());
    }
}
