use async_trait::async_trait;
use reqwest::Client;

use crate::domain::notification::OutboundNotification;
use crate::domain::ports::NotificationSink;

/// Posts each notification to the notification service.
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl NotificationSink for HttpNotifier {
    async fn send(&self, notification: &OutboundNotification) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Notification service unreachable: {e}"))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Notification service rejected the message: {e}"))?;
        Ok(())
    }
}

/// Used when no notification service is configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, notification: &OutboundNotification) -> anyhow::Result<()> {
        tracing::info!(
            order_id = %notification.order_id,
            kind = ?notification.kind,
            recipients = notification.recipients.len(),
            "Notification"
        );
        Ok(())
    }
}
