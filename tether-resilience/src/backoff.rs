//! Backoff delays for retry policies

use std::time::Duration;

/// Linear backoff: the wait after attempt `n` is `initial_delay * n`,
/// capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCalculator {
    initial_delay: Duration,
    max_delay: Duration,
}

impl BackoffCalculator {
    pub fn linear(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(attempt)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let calc = BackoffCalculator::linear(Duration::from_millis(1000), Duration::from_secs(3));

        assert_eq!(calc.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(calc.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(calc.calculate_delay(9), Duration::from_secs(3)); // capped
    }

    #[test]
    fn test_zero_base_never_waits() {
        let calc = BackoffCalculator::linear(Duration::ZERO, Duration::ZERO);
        assert_eq!(calc.calculate_delay(5), Duration::ZERO);
    }
}
