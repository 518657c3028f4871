//! Bounded retry and poll-interval policies.
//!
//! Drivers never hard-code sleeps; they take a [`Backoff`] so the interval
//! policy can change without touching call sites. The status updater uses a
//! fixed 4-attempt / 2-second policy, the ingestion poll loop a fixed
//! 3-second interval.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay before the given retry. `attempt` counts failed tries so far,
    /// starting at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                (*base * factor).min(*cap)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Run `op` up to `attempts` times, sleeping between failures. The last
    /// error is returned when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut tried = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tried += 1;
                    if tried >= attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.backoff.delay(tried)).await;
                }
            }
        }
    }
}
