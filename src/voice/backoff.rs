//! Exponential backoff for the voice poller's reconnect-after-close path.
//!
//! Grounded on `driver::retry::strategy::ExponentialBackoff`: each retry
//! waits for roughly twice the last delay, clamped to `[min, max]` and
//! perturbed by a uniform jitter, so a flapping voice server doesn't get
//! hammered with reconnect attempts at a fixed cadence.

use rand::random;
use std::time::Duration;

/// Exponential backoff waiting strategy used by [`super::supervisor`]'s
/// poller when a voice close code other than a recognised terminal/`4014`
/// one is seen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    jitter: f32,
    last: Option<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_secs(10),
            jitter: 0.1,
            last: None,
        }
    }
}

impl ExponentialBackoff {
    /// Computes the next delay and records it as the new "last" wait.
    pub fn next_delay(&mut self) -> Duration {
        let attempt = self.last.map_or(self.min, |t| 2 * t);
        let perturb = (1.0 - (self.jitter * 2.0 * (random::<f32>() - 1.0))).clamp(0.0, 2.0);
        let mut target = attempt.mul_f32(perturb);

        let safe_max = if self.max < self.min { self.min } else { self.max };
        target = target.clamp(self.min, safe_max);

        self.last = Some(target);
        target
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delays_stay_within_configured_bounds() {
        let mut backoff = ExponentialBackoff::default();
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(250));
            assert!(delay <= Duration::from_secs(10));
        }
    }
}
