//! Per-tool circuit breaker: consecutive-failure counter with a time-gated
//! open state.

use std::time::{Duration, Instant};

/// Breaker state for one tool. Closed until `circuit_fail_threshold`
/// consecutive failures, then open for `circuit_open_sec`.
#[derive(Debug, Clone, Default)]
pub struct Breaker {
    failures: u32,
    opened_until: Option<Instant>,
}

impl Breaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the circuit is open (now < opened_until).
    pub fn is_open(&self) -> bool {
        self.opened_until.map_or(false, |until| Instant::now() < until)
    }

    /// Resets the failure count and closes the circuit.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.opened_until = None;
    }

    /// Increments the failure count; opens the circuit for `open_for` once
    /// the threshold is reached.
    pub fn record_failure(&mut self, threshold: u32, open_for: Duration) {
        self.failures += 1;
        if self.failures >= threshold {
            self.opened_until = Some(Instant::now() + open_for);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Below the threshold the circuit stays closed.
    #[test]
    fn stays_closed_below_threshold() {
        let mut b = Breaker::new();
        b.record_failure(3, Duration::from_secs(60));
        b.record_failure(3, Duration::from_secs(60));
        assert!(!b.is_open());
        assert_eq!(b.consecutive_failures(), 2);
    }

    /// **Scenario**: Hitting the threshold opens the circuit.
    #[test]
    fn opens_at_threshold() {
        let mut b = Breaker::new();
        for _ in 0..3 {
            b.record_failure(3, Duration::from_secs(60));
        }
        assert!(b.is_open());
    }

    /// **Scenario**: A success in between resets the consecutive count, so the
    /// circuit never opens.
    #[test]
    fn success_resets_counter() {
        let mut b = Breaker::new();
        b.record_failure(3, Duration::from_secs(60));
        b.record_failure(3, Duration::from_secs(60));
        b.record_success();
        b.record_failure(3, Duration::from_secs(60));
        assert!(!b.is_open());
        assert_eq!(b.consecutive_failures(), 1);
    }

    /// **Scenario**: An opened circuit closes again once the window elapses.
    #[test]
    fn closes_after_window() {
        let mut b = Breaker::new();
        for _ in 0..3 {
            b.record_failure(3, Duration::from_millis(10));
        }
        assert!(b.is_open());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!b.is_open());
    }
}
