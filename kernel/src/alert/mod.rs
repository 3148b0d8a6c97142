// Alert Sink
//
// Best-effort operational notifications. Delivery failures are logged
// locally and otherwise ignored: alerting must never stall or fail the
// ingest path.

use std::sync::Arc;

use async_trait::async_trait;

pub mod webhook;

pub use webhook::WebhookNotifier;

/// Subject used when the buffer crosses its memory threshold.
pub const BUFFER_OVERFLOW_SUBJECT: &str = "Buffer Size Warning";

/// Subject used when the consumer dies.
pub const CONSUMER_DOWN_SUBJECT: &str = "Log Consumer Down";

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("alert rejected: {0}")]
    Rejected(String),
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AlertError>;
}

/// Notifier that only writes alerts to the local log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AlertError> {
        tracing::warn!(subject, message, "alert raised");
        Ok(())
    }
}

/// Fire-and-forget front for a [`Notifier`].
#[derive(Clone)]
pub struct AlertSink {
    notifier: Arc<dyn Notifier>,
}

impl AlertSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send an alert in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, subject: impl Into<String>, message: impl Into<String>) {
        let sink = self.clone();
        let subject = subject.into();
        let message = message.into();
        tokio::spawn(async move {
            sink.notify_and_wait(&subject, &message).await;
        });
    }

    /// Send an alert and wait for the attempt to finish.
    ///
    /// Used right before the process goes down, where a detached task
    /// would not get a chance to run.
    pub async fn notify_and_wait(&self, subject: &str, message: &str) {
        match self.notifier.notify(subject, message).await {
            Ok(()) => tracing::info!(subject, "alert sent"),
            Err(e) => tracing::warn!(subject, error = %e, "failed to send alert"),
        }
    }
}

impl std::fmt::Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSink").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn notify_and_wait_delivers() {
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = AlertSink::new(notifier.clone());

        sink.notify_and_wait(CONSUMER_DOWN_SUBJECT, "bus gone").await;

        assert_eq!(
            notifier.sent(),
            vec![(CONSUMER_DOWN_SUBJECT.to_string(), "bus gone".to_string())]
        );
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let sink = AlertSink::new(notifier.clone());

        sink.notify_and_wait(BUFFER_OVERFLOW_SUBJECT, "too big").await;

        assert_eq!(notifier.subjects(), vec![BUFFER_OVERFLOW_SUBJECT]);
    }

    #[tokio::test]
    async fn background_notify_eventually_runs() {
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = AlertSink::new(notifier.clone());

        sink.notify(BUFFER_OVERFLOW_SUBJECT, "too big");
        for _ in 0..10 {
            if !notifier.sent().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(notifier.subjects(), vec![BUFFER_OVERFLOW_SUBJECT]);
    }
}
