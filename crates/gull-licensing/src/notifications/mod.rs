//! Transactional email delivery for licence workflows.

mod notify;
mod queue;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

pub use notify::{NotifyClient, NotifyTemplates};
pub use queue::{NotificationQueue, NotificationWorker, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    Amendment,
    Return,
}

/// One email ready for the provider: a template, a recipient and flat personalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub template: NotificationTemplate,
    pub recipient: String,
    pub reference: Option<String>,
    pub personalisation: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(
        template: NotificationTemplate,
        recipient: impl Into<String>,
        personalisation: BTreeMap<String, String>,
    ) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            reference: None,
            personalisation,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { provider_id: Option<String> },
    /// No provider credential is configured; nothing left the process.
    Disabled,
    /// Accepted for background delivery.
    Queued,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notify api key is malformed")]
    InvalidApiKey,
    #[error("failed to sign notify token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("notify request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notify rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification queue is closed")]
    QueueClosed,
}

impl NotificationError {
    /// Client errors other than rate limiting will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotificationError::Transport(_) => true,
            NotificationError::Rejected { status, .. } => *status == 429 || *status >= 500,
            NotificationError::InvalidApiKey
            | NotificationError::Token(_)
            | NotificationError::QueueClosed => false,
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError>;
}

/// Send every notification concurrently. Failures are logged and never propagated.
pub async fn dispatch_all<D>(dispatcher: &D, notifications: Vec<Notification>)
where
    D: NotificationDispatcher + ?Sized,
{
    let sends = notifications.into_iter().map(|notification| async move {
        let template = notification.template;
        let reference = notification.reference.clone();
        (template, reference, dispatcher.send(notification).await)
    });

    for (template, reference, result) in join_all(sends).await {
        match result {
            Ok(outcome) => {
                info!(?template, ?reference, ?outcome, "notification dispatched");
            }
            Err(err) => {
                warn!(?template, ?reference, error = %err, "notification dispatch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Flaky {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationDispatcher for Flaky {
        async fn send(
            &self,
            notification: Notification,
        ) -> Result<DispatchOutcome, NotificationError> {
            self.seen
                .lock()
                .expect("seen mutex poisoned")
                .push(notification.recipient.clone());
            if notification.recipient.starts_with("bad") {
                return Err(NotificationError::Rejected {
                    status: 400,
                    body: "invalid email".to_string(),
                });
            }
            Ok(DispatchOutcome::Sent { provider_id: None })
        }
    }

    #[tokio::test]
    async fn dispatch_all_attempts_every_recipient_despite_failures() {
        let dispatcher = Flaky::default();
        let notifications = ["bad@example.com", "holder@example.com"]
            .into_iter()
            .map(|recipient| {
                Notification::new(NotificationTemplate::Return, recipient, BTreeMap::new())
            })
            .collect();

        dispatch_all(&dispatcher, notifications).await;

        let seen = dispatcher.seen.lock().expect("seen mutex poisoned").clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&"holder@example.com".to_string()));
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        let throttled = NotificationError::Rejected {
            status: 429,
            body: String::new(),
        };
        let bad_request = NotificationError::Rejected {
            status: 400,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!NotificationError::InvalidApiKey.is_retryable());
    }
}
