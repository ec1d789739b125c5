use std::time::Duration;

use rand::Rng;

/// Randomized exponential backoff.
///
/// Each declared failure doubles the current ceiling (up to `max`), and every
/// deadline handed out is drawn uniformly from `[1ms, current]` so peers that
/// failed together do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl BackoffTimer {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            current: initial,
            max: max.max(initial),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn increase_timeout(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn next_deadline(&self) -> Duration {
        let ceiling = self.current.as_millis().max(1) as u64;
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(1..=ceiling))
    }
}
