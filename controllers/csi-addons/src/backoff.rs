//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for requeueing resources whose agent
//! calls keep failing. It grows more slowly than exponential backoff, so an
//! operator fixing credentials or a class sees the next attempt soon, while a
//! permanently broken resource still settles at the cap.
//!
//! Default sequence: 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Previous backoff value
    prev: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given minimum and maximum
    ///
    /// # Arguments
    ///
    /// * `min` - First two values of the sequence
    /// * `max` - Cap on the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max: max.max(min),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }

    /// Calculate the backoff for a given error count (stateless)
    ///
    /// The sequence starts at `min` for error_count 0 and 1, then follows
    /// min, min, min*2, min*3, min*5, min*8, ..., capped at `max`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min: Duration, max: Duration) -> Duration {
        if error_count <= 1 {
            return min.min(max);
        }

        let mut prev = min;
        let mut current = min;

        for _ in 2..=error_count {
            let next = prev.saturating_add(current);
            prev = current;
            current = next.min(max);

            if current >= max {
                break;
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(secs(5), secs(300));

        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(10));
        assert_eq!(backoff.next_backoff(), secs(15));
        assert_eq!(backoff.next_backoff(), secs(25));
        assert_eq!(backoff.next_backoff(), secs(40));
        assert_eq!(backoff.next_backoff(), secs(65));
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(secs(5), secs(300));

        for _ in 0..10 {
            backoff.next_backoff();
        }
        // 275 + 170 would be 445, capped
        assert_eq!(backoff.next_backoff(), secs(300));
        assert_eq!(backoff.next_backoff(), secs(300));
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(secs(5), secs(300));

        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(10));

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(5));
    }

    #[test]
    fn test_calculate_for_error_count() {
        assert_eq!(FibonacciBackoff::calculate_for_error_count(0, secs(5), secs(300)), secs(5));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(1, secs(5), secs(300)), secs(5));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(2, secs(5), secs(300)), secs(10));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(4, secs(5), secs(300)), secs(25));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(50, secs(5), secs(300)), secs(300));
    }
}
