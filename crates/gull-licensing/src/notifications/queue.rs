//! Background delivery for notifications.
//!
//! `NotificationQueue` accepts a notification immediately and hands it to a
//! `NotificationWorker` running on its own tokio task, which retries transient
//! provider failures a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DispatchOutcome, Notification, NotificationDispatcher, NotificationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    /// Build the queue and the worker that drains it. The worker must be spawned by the caller.
    pub fn channel<D>(inner: Arc<D>, policy: RetryPolicy) -> (Self, NotificationWorker<D>)
    where
        D: NotificationDispatcher + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            NotificationWorker {
                receiver,
                inner,
                policy,
            },
        )
    }
}

#[async_trait]
impl NotificationDispatcher for NotificationQueue {
    async fn send(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        self.sender
            .send(notification)
            .map_err(|_| NotificationError::QueueClosed)?;
        Ok(DispatchOutcome::Queued)
    }
}

pub struct NotificationWorker<D> {
    receiver: mpsc::UnboundedReceiver<Notification>,
    inner: Arc<D>,
    policy: RetryPolicy,
}

impl<D> NotificationWorker<D>
where
    D: NotificationDispatcher + 'static,
{
    /// Deliver queued notifications until every queue handle is dropped.
    pub async fn run(mut self) {
        info!(
            max_attempts = self.policy.max_attempts,
            delay_ms = self.policy.delay.as_millis() as u64,
            "notification worker started"
        );

        while let Some(notification) = self.receiver.recv().await {
            self.deliver(notification).await;
        }

        info!("notification queue closed; worker stopping");
    }

    async fn deliver(&self, notification: Notification) -> Option<DispatchOutcome> {
        let template = notification.template;
        let mut attempt = 1;
        loop {
            match self.inner.send(notification.clone()).await {
                Ok(outcome) => {
                    debug!(?template, attempt, ?outcome, "queued notification delivered");
                    return Some(outcome);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(?template, attempt, error = %err, "notification failed; retrying");
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(?template, attempt, error = %err, "notification abandoned");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::notifications::NotificationTemplate;

    struct FailTimes {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl FailTimes {
        fn new(failures: u32, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationDispatcher for FailTimes {
        async fn send(&self, _: Notification) -> Result<DispatchOutcome, NotificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(NotificationError::Rejected {
                    status: self.status,
                    body: "unavailable".to_string(),
                });
            }
            Ok(DispatchOutcome::Sent {
                provider_id: Some(format!("msg-{call}")),
            })
        }
    }

    fn notification() -> Notification {
        Notification::new(
            NotificationTemplate::Amendment,
            "holder@example.com",
            BTreeMap::new(),
        )
    }

    fn worker(inner: Arc<FailTimes>, attempts: u32) -> NotificationWorker<FailTimes> {
        let (_, worker) =
            NotificationQueue::channel(inner, RetryPolicy::new(attempts, Duration::ZERO));
        worker
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let inner = Arc::new(FailTimes::new(2, 503));
        let outcome = worker(inner.clone(), 3).deliver(notification()).await;

        assert!(matches!(outcome, Some(DispatchOutcome::Sent { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let inner = Arc::new(FailTimes::new(10, 500));
        let outcome = worker(inner.clone(), 3).deliver(notification()).await;

        assert!(outcome.is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let inner = Arc::new(FailTimes::new(1, 400));
        let outcome = worker(inner.clone(), 3).deliver(notification()).await;

        assert!(outcome.is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_accepts_and_worker_drains_until_closed() {
        let inner = Arc::new(FailTimes::new(0, 500));
        let (queue, worker) =
            NotificationQueue::channel(inner.clone(), RetryPolicy::new(1, Duration::ZERO));
        let handle = tokio::spawn(worker.run());

        let outcome = queue.send(notification()).await.expect("queue accepts");
        assert_eq!(outcome, DispatchOutcome::Queued);
        drop(queue);

        handle.await.expect("worker exits cleanly");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
