use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use requestflow_core::config::NotificationConfig;
use requestflow_core::domain::request::{RequestType, Urgency};
use requestflow_core::domain::user::User;
use requestflow_core::ports::{AssignmentNotice, Contact, Notifier};

/// Posts assignment notices to an outbound mail relay.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    to: Contact,
    process_id: i64,
    #[serde(rename = "type")]
    request_type: RequestType,
    title: &'a str,
    description: &'a str,
    urgency: Urgency,
    created_by: &'a Contact,
    is_forwarded: bool,
    forwarded_by: Option<&'a Contact>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into(), token })
    }

    /// `None` when delivery is disabled or no relay is configured.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>, reqwest::Error> {
        match (&config.webhook_url, config.enabled) {
            (Some(url), true) => Self::new(
                url.clone(),
                config.webhook_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_assignment(&self, recipient: &User, notice: &AssignmentNotice) -> bool {
        let payload = WebhookPayload {
            to: Contact::from(recipient),
            process_id: notice.request_id.0,
            request_type: notice.request_type,
            title: &notice.title,
            description: &notice.description,
            urgency: notice.urgency,
            created_by: &notice.created_by,
            is_forwarded: notice.is_forwarded,
            forwarded_by: notice.forwarded_by.as_ref(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    event_name = "notification.webhook.delivered",
                    request_id = notice.request_id.0,
                    recipient_id = recipient.id.0,
                    "assignment notice delivered"
                );
                true
            }
            Ok(response) => {
                warn!(
                    event_name = "notification.webhook.rejected",
                    request_id = notice.request_id.0,
                    recipient_id = recipient.id.0,
                    status = response.status().as_u16(),
                    "relay rejected assignment notice"
                );
                false
            }
            Err(error) => {
                warn!(
                    event_name = "notification.webhook.unreachable",
                    request_id = notice.request_id.0,
                    recipient_id = recipient.id.0,
                    error = %error,
                    "relay unreachable"
                );
                false
            }
        }
    }
}
