//! Repeated polling with a time budget and cancellation
//!
//! Polls run back to back, separated by `interval`. The loop ends when the
//! budget is spent or the token is cancelled; a cancellation interrupts the
//! pause between polls. A poll in progress is allowed to finish, and runs it
//! dispatched are never cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consumer::{PollSummary, QueueConsumer};
use crate::queue::QueueError;

/// Something that can be polled once
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll_once(&self) -> Result<PollSummary, QueueError>;
}

#[async_trait]
impl Poller for QueueConsumer {
    async fn poll_once(&self) -> Result<PollSummary, QueueError> {
        QueueConsumer::poll_once(self).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub polls: u64,
    pub dispatched: u64,
    pub errors: u64,
}

pub struct PollScheduler {
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Poll until `budget` elapses (forever when `None`) or `cancel` fires
    pub async fn run(
        &self,
        poller: &dyn Poller,
        budget: Option<Duration>,
        cancel: CancellationToken,
    ) -> ScheduleSummary {
        let deadline = budget.map(|budget| Instant::now() + budget);
        let mut summary = ScheduleSummary::default();

        info!(
            interval_secs = self.interval.as_secs(),
            budget_secs = budget.map(|b| b.as_secs()),
            "Polling started"
        );

        loop {
            if cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            summary.polls += 1;
            match poller.poll_once().await {
                Ok(poll) => summary.dispatched += poll.processed as u64,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, poll = summary.polls, "Poll failed");
                },
            }

            let pause = match deadline {
                Some(deadline) => self
                    .interval
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.interval,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Polling cancelled");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(
            polls = summary.polls,
            dispatched = summary.dispatched,
            errors = summary.errors,
            "Polling stopped"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingPoller {
        polls: AtomicU64,
        fail: bool,
    }

    impl CountingPoller {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                polls: AtomicU64::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Poller for CountingPoller {
        async fn poll_once(&self) -> Result<PollSummary, QueueError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(QueueError::Receive("unreachable".to_string()));
            }
            Ok(PollSummary {
                processed: 2,
                total: 1,
                raw_messages: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_polling() {
        let poller = CountingPoller::new(false);
        let scheduler = PollScheduler::new(Duration::from_secs(5));

        let summary = scheduler
            .run(poller.as_ref(), Some(Duration::from_secs(12)), CancellationToken::new())
            .await;

        // t = 0, 5, 10; the pause after the third poll is cut to the budget.
        assert_eq!(summary.polls, 3);
        assert_eq!(summary.dispatched, 6);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pause() {
        let poller = CountingPoller::new(false);
        let cancel = CancellationToken::new();

        let handle = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                PollScheduler::new(Duration::from_secs(60))
                    .run(poller.as_ref(), None, cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert_eq!(summary.polls, 1);
        assert!(Instant::now() - cancelled_at < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_polling() {
        let poller = CountingPoller::new(true);
        let scheduler = PollScheduler::new(Duration::from_secs(1));

        let summary = scheduler
            .run(poller.as_ref(), Some(Duration::from_secs(3)), CancellationToken::new())
            .await;

        assert_eq!(summary.polls, 3);
        assert_eq!(summary.errors, 3);
        assert_eq!(summary.dispatched, 0);
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let poller = CountingPoller::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = PollScheduler::new(Duration::from_secs(1))
            .run(poller.as_ref(), None, cancel)
            .await;
        assert_eq!(summary.polls, 0);
    }
}
