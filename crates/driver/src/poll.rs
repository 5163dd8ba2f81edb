//! Bounded polling against unstable external UI state.
//!
//! The studio gives no readiness callbacks, so every "wait until ready"
//! is a bounded retry loop. Timeout meaning differs per stage: some
//! expiries fail the stage, some only log and let the workflow proceed.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What an expired wait means for the calling stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Expiry fails the stage.
    Fatal,
    /// Expiry is logged and the workflow proceeds.
    Advisory,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOutFatal,
    TimedOutAdvisory,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// Poll `probe` at `interval` until it yields a value or `timeout`
/// elapses. Sleeps are cooperative, so cancellation lands between
/// iterations.
pub async fn poll_until<T, F, Fut>(
    label: &str,
    mut probe: F,
    interval: Duration,
    timeout: Duration,
    on_timeout: OnTimeout,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = std::time::Instant::now();

    loop {
        if let Some(value) = probe().await {
            debug!(
                "{}: ready after {}s",
                label,
                start.elapsed().as_secs()
            );
            return PollOutcome::Ready(value);
        }

        if start.elapsed() + interval > timeout {
            return match on_timeout {
                OnTimeout::Fatal => {
                    warn!("{}: timed out after {}s", label, timeout.as_secs());
                    PollOutcome::TimedOutFatal
                }
                OnTimeout::Advisory => {
                    warn!(
                        "{}: timed out after {}s - proceeding anyway",
                        label,
                        timeout.as_secs()
                    );
                    PollOutcome::TimedOutAdvisory
                }
            };
        }

        debug!("{}: waiting... ({}s)", label, start.elapsed().as_secs());
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_ready_immediately() {
        let outcome = poll_until(
            "test",
            || async { Some(42u32) },
            Duration::from_millis(10),
            Duration::from_millis(100),
            OnTimeout::Fatal,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Ready(42));
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome = poll_until(
            "test",
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) >= 2 {
                    Some("done")
                } else {
                    None
                }
            },
            Duration::from_millis(5),
            Duration::from_millis(500),
            OnTimeout::Fatal,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Ready("done"));
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_fatal_timeout() {
        let outcome: PollOutcome<()> = poll_until(
            "test",
            || async { None },
            Duration::from_millis(5),
            Duration::from_millis(30),
            OnTimeout::Fatal,
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOutFatal);
        assert!(outcome.into_value().is_none());
    }

    #[tokio::test]
    async fn test_advisory_timeout() {
        let outcome: PollOutcome<()> = poll_until(
            "test",
            || async { None },
            Duration::from_millis(5),
            Duration::from_millis(30),
            OnTimeout::Advisory,
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOutAdvisory);
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let start = std::time::Instant::now();
        let _: PollOutcome<()> = poll_until(
            "test",
            || async { None },
            Duration::from_millis(10),
            Duration::from_millis(50),
            OnTimeout::Fatal,
        )
        .await;
        // Must not run meaningfully past the bound
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
