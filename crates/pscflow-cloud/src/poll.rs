//! Convergence polling against an external read-only status query

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

/// Bookkeeping for a single poll call
#[derive(Debug, Clone, Copy)]
pub struct PollState {
    pub target_reached: bool,
    pub attempts_used: u32,
    pub deadline: Instant,
}

/// Polls a status query on a fixed interval until it reports `true` or time runs out.
///
/// Running out of time is a normal `false` outcome, never an error.
#[derive(Debug, Clone, Copy)]
pub struct CompletionPoller {
    interval: Duration,
    max_wait: Duration,
}

impl Default for CompletionPoller {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_WAIT)
    }
}

impl CompletionPoller {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Poll until `query` yields `Some(true)`.
    ///
    /// `Some(false)` and `None` (indeterminate) keep polling; a query error is
    /// logged and polling continues.
    pub async fn poll_until<F, Fut, E>(&self, query: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<bool>, E>>,
        E: Display,
    {
        self.poll(query).await.target_reached
    }

    /// Same as [`poll_until`](Self::poll_until) but returns the final poll state
    pub async fn poll<F, Fut, E>(&self, mut query: F) -> PollState
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<bool>, E>>,
        E: Display,
    {
        let started = Instant::now();
        let mut state = PollState {
            target_reached: false,
            attempts_used: 0,
            deadline: started + self.max_wait,
        };

        loop {
            tokio::time::sleep(self.interval).await;

            state.attempts_used += 1;
            match query().await {
                Ok(Some(true)) => {
                    tracing::info!(
                        "Target state reached after {} check(s)",
                        state.attempts_used
                    );
                    state.target_reached = true;
                    return state;
                }
                Ok(Some(false)) | Ok(None) => {
                    tracing::debug!(
                        "Target state not reached yet (check {})",
                        state.attempts_used
                    );
                }
                Err(e) => {
                    tracing::warn!("Status query failed (check {}): {}", state.attempts_used, e);
                }
            }

            if Instant::now() >= state.deadline {
                tracing::warn!(
                    "Gave up waiting after {}s ({} check(s))",
                    started.elapsed().as_secs(),
                    state.attempts_used
                );
                return state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_never_true_returns_false_after_two_checks() {
        let poller = CompletionPoller::new(Duration::from_secs(30), Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let reached = poller
            .poll_until(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(Some(false))
                }
            })
            .await;

        assert!(!reached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_as_soon_as_target_reached() {
        let poller = CompletionPoller::new(Duration::from_secs(30), Duration::from_secs(600));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let state = poller
            .poll(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, String>(if n == 3 { Some(true) } else { None })
                }
            })
            .await;

        assert!(state.target_reached);
        assert_eq!(state.attempts_used, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_are_swallowed() {
        let poller = CompletionPoller::new(Duration::from_secs(30), Duration::from_secs(120));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let reached = poller
            .poll_until(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err("gcloud: connection reset".to_string())
                    } else {
                        Ok(Some(true))
                    }
                }
            })
            .await;

        assert!(reached);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_by_max_wait_plus_one_interval() {
        let interval = Duration::from_secs(45);
        let max_wait = Duration::from_secs(100);
        let poller = CompletionPoller::new(interval, max_wait);
        let started = Instant::now();

        let reached = poller
            .poll_until(|| async { Err::<Option<bool>, _>("always failing") })
            .await;

        assert!(!reached);
        assert!(started.elapsed() <= max_wait + interval);
    }
}
