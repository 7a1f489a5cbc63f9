use std::time::{Duration, Instant};

/// Suspends processing after repeated failures.
///
/// Closed: every attempt allowed. Open: attempts refused until `cooldown`
/// has passed since it opened. After the cooldown one trial attempt runs;
/// success closes the breaker, failure reopens it at once.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failures: 0,
            opened_at: None,
            probing: false,
        }
    }

    /// Whether an attempt may run at `now`.
    pub fn allow(&mut self, now: Instant) -> bool {
        let Some(opened_at) = self.opened_at else {
            return true;
        };
        if now.saturating_duration_since(opened_at) < self.cooldown {
            return false;
        }
        tracing::info!(
            "retrying segmentation after {:?} cooldown ({} failures)",
            self.cooldown,
            self.failures
        );
        self.opened_at = None;
        self.probing = true;
        true
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.probing = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        if self.probing || self.failures >= self.threshold {
            if self.opened_at.is_none() {
                tracing::warn!(
                    "too many segmentation failures ({}), suspending processing for {:?}",
                    self.failures,
                    self.cooldown
                );
            }
            self.opened_at = Some(now);
            self.probing = false;
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.opened_at = None;
        self.probing = false;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(2);

    #[test]
    fn opens_at_threshold_and_recovers_after_cooldown() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);

        for _ in 0..2 {
            assert!(breaker.allow(start));
            breaker.record_failure(start);
        }
        assert!(!breaker.is_open());
        breaker.record_failure(start);
        assert!(breaker.is_open());

        assert!(!breaker.allow(start + Duration::from_millis(1999)));
        assert!(breaker.allow(start + COOLDOWN));
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
        assert!(!breaker.is_open());
    }

    #[test]
    fn failed_trial_reopens_immediately() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(2, COOLDOWN);
        breaker.record_failure(start);
        breaker.record_failure(start);

        let trial_at = start + COOLDOWN;
        assert!(breaker.allow(trial_at));
        breaker.record_failure(trial_at);
        assert!(breaker.is_open());
        assert!(!breaker.allow(trial_at + Duration::from_secs(1)));
        assert!(breaker.allow(trial_at + COOLDOWN));
    }

    #[test]
    fn success_resets_the_count() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);
        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 1);
    }
}
