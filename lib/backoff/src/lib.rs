use std::time::Duration;

/// A retry delay which doubles after every failed attempt, up to a ceiling.
///
/// Used between failed list/watch attempts, the delay is reset once the
/// remote end answers again.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl ExponentialBackoff {
    pub const fn new(initial: Duration, max_delay: Duration) -> ExponentialBackoff {
        ExponentialBackoff {
            current: initial,
            initial,
            max_delay,
        }
    }

    /// The next `Duration` to wait for.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max_delay);
        self.current = self.current.saturating_mul(2).min(self.max_delay);
        delay
    }

    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await
    }

    pub fn reset(&mut self) {
        self.current = self.initial
    }
}
