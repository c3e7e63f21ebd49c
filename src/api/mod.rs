//! Outbound collaborators: the payment provider and the notification service.

pub mod notifications;
pub mod payment_provider;
pub mod sandbox;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::config::AppConfig;
use crate::domain::ports::{GatewayRef, NotificationSink};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))
}

/// Real provider when `PAYMENT_PROVIDER_URL` is set, sandbox otherwise.
pub fn payment_gateway(config: &AppConfig, client: Client) -> GatewayRef {
    let provider = &config.payment_provider;
    match &provider.url {
        Some(url) => {
            tracing::info!("Using payment provider at {}", url);
            Arc::new(payment_provider::HttpPaymentGateway::new(
                client,
                url.clone(),
                provider.api_key.clone(),
                provider.webhook_secret.clone(),
            ))
        }
        None => {
            tracing::warn!("PAYMENT_PROVIDER_URL is not set, using the sandbox provider");
            Arc::new(sandbox::SandboxGateway::new(provider.webhook_secret.clone()))
        }
    }
}

pub fn notification_sink(config: &AppConfig, client: Client) -> Arc<dyn NotificationSink> {
    match &config.notification_service_url {
        Some(url) => Arc::new(notifications::HttpNotifier::new(client, url.clone())),
        None => Arc::new(notifications::LogNotifier),
    }
}
