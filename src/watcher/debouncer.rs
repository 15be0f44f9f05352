//! Restartable single-shot timer for quiet-period detection.
//!
//! Debouncing prevents a flood of batches when files are saved several
//! times in quick succession (auto-save, formatters, editors writing a
//! temp file and the target). Every change pushes the deadline forward;
//! the timer fires only once nothing has arrived for the whole delay.

use tokio::time::{Duration, Instant, sleep_until};

/// Single-shot timer holding at most one armed deadline.
///
/// Re-arming replaces the previous deadline, so there is never more than
/// one pending fire. The fire itself is observed by awaiting
/// [`DebounceTimer::expired`], which disarms the timer as it resolves.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Create an unarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any armed deadline and arm a new one `delay` from now.
    pub fn reset(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Disarm the timer. No-op when nothing is armed.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a fire is currently scheduled.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The currently armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Wait for the armed deadline and disarm.
    ///
    /// Pends forever while unarmed. Cancel-safe: dropping the future before
    /// it resolves leaves the deadline in place.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let mut timer = DebounceTimer::new();
        let start = Instant::now();

        timer.reset(Duration::from_millis(50));
        assert!(timer.is_armed());

        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_replaces_previous_deadline() {
        let mut timer = DebounceTimer::new();
        let start = Instant::now();

        timer.reset(Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(30)).await;
        timer.reset(Duration::from_millis(50));

        // The first deadline (50ms) must not fire
        assert!(
            timeout(Duration::from_millis(40), timer.expired())
                .await
                .is_err()
        );

        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_most_once_per_reset() {
        let mut timer = DebounceTimer::new();
        timer.reset(Duration::from_millis(10));
        timer.expired().await;

        // Disarmed after firing: a second wait never completes
        assert!(
            timeout(Duration::from_secs(1), timer.expired())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let mut timer = DebounceTimer::new();
        timer.reset(Duration::from_millis(10));
        timer.cancel();
        assert!(!timer.is_armed());
        assert!(timer.deadline().is_none());

        assert!(
            timeout(Duration::from_secs(1), timer.expired())
                .await
                .is_err()
        );

        // Cancelling an unarmed timer is harmless
        timer.cancel();
        assert!(!timer.is_armed());
    }
}
