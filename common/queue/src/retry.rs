use std::time;

#[derive(Copy, Clone, Debug)]
/// The retry policy a worker uses to determine how long to back off when a
/// job fails with a retryable error, and when to stop retrying at all.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Attempts after which a job is marked failed instead of retried.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts,
        }
    }

    /// Calculate the backoff before the next retry of a job on its given
    /// attempt, or None when retries are exhausted.
    pub fn time_until_next_retry(&self, attempt: u32) -> Option<time::Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let candidate_interval =
            self.initial_interval * self.backoff_coefficient.saturating_pow(attempt);

        let interval = match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        };

        Some(interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: Some(time::Duration::from_secs(300)),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_secs(1),
            Some(time::Duration::from_secs(8)),
            10,
        );

        assert_eq!(
            policy.time_until_next_retry(0),
            Some(time::Duration::from_secs(1))
        );
        assert_eq!(
            policy.time_until_next_retry(2),
            Some(time::Duration::from_secs(4))
        );
        assert_eq!(
            policy.time_until_next_retry(6),
            Some(time::Duration::from_secs(8))
        );
    }

    #[test]
    fn retries_exhaust_at_max_attempts() {
        let policy = RetryPolicy::new(2, time::Duration::from_secs(1), None, 3);

        assert!(policy.time_until_next_retry(2).is_some());
        assert!(policy.time_until_next_retry(3).is_none());
    }
}
