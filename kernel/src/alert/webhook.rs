// Webhook Notifier
//
// Posts alerts as JSON to an HTTP endpoint (mail relay, chat hook, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{AlertError, Notifier};

#[derive(Debug, Serialize)]
struct AlertBody<'a> {
    subject: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    recipient: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, recipient: Option<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            recipient,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AlertError> {
        let body = AlertBody {
            subject,
            message,
            recipient: self.recipient.as_deref(),
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Rejected(format!("endpoint returned {status}")));
        }
        Ok(())
    }
}
