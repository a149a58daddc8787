//! Production implementation of GuardianContext using Tokio.

use crate::GuardianContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Production context backed by the Tokio clock.
///
/// Wall-clock time is the creation timestamp plus elapsed Tokio time, so
/// deadlines follow `tokio::time::pause()` in tests exactly as timers do.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Wall-clock time at `start`
    epoch: SystemTime,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch: SystemTime::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuardianContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Tasks are detached; they end through their own stop signal
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_time_follows_paused_clock() {
        let ctx = TokioContext::new();
        let before = ctx.system_time();
        ctx.sleep(Duration::from_secs(600)).await;
        let after = ctx.system_time();

        let elapsed = after.duration_since(before).unwrap();
        assert!(elapsed >= Duration::from_secs(600));
        assert!(elapsed < Duration::from_secs(601));
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
