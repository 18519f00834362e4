//! Cooperative cancellation and pacing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::status::ScavengeError;

/// Shared cancellation flag
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Return [`ScavengeError::Cancelled`] if cancellation was requested
    #[inline]
    pub fn check(&self) -> Result<(), ScavengeError> {
        if self.is_cancelled() {
            Err(ScavengeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Pause between units of work
#[derive(Debug, Clone, Copy, Default)]
pub struct Throttle {
    interval: Duration,
}

impl Throttle {
    const POLL_STEP: Duration = Duration::from_millis(10);

    /// Create a throttle resting `interval` each time
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// A throttle that never rests
    pub fn none() -> Self {
        Self::default()
    }

    /// The rest interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep for the interval, returning early if `token` is cancelled
    pub fn rest(&self, token: &CancellationToken) -> Result<(), ScavengeError> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let deadline = Instant::now() + self.interval;
        loop {
            token.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Self::POLL_STEP));
        }
    }
}
