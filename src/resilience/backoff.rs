//! Exponential backoff with jitter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Reconnection backoff a host applies when dialing its own parents.
///
/// Reset whenever a child (re)connects, so the host re-dials upstream
/// promptly instead of sitting out the remainder of a long delay.
#[derive(Debug)]
pub struct ParentBackoff {
    attempts: AtomicU32,
    base_ms: u64,
    max_ms: u64,
}

impl ParentBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            base_ms,
            max_ms,
        }
    }

    /// Delay to apply before the next reconnection attempt.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }

    /// Forget accumulated failures.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Default for ParentBackoff {
    fn default() -> Self {
        Self::new(500, 60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000);
    }

    #[test]
    fn test_parent_backoff_reset() {
        let backoff = ParentBackoff::new(100, 2000);
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!(second >= first);
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        let after_reset = backoff.next_delay();
        assert!(after_reset.as_millis() < 200 + 20);
    }
}
