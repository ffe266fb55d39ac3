use std::time::Duration;

/// Doubling delay sequence, capped at `max`.
///
/// Each call to `next_delay` returns the current delay and then advances it.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self::with_multiplier(initial, max, 2)
    }

    pub fn with_multiplier(initial: Duration, max: Duration, multiplier: u32) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    /// Start the sequence over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
