use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::api::signature;
use crate::app_error::GatewayError;
use crate::domain::money::Money;
use crate::domain::ports::{IntentMetadata, PaymentGateway};

#[derive(Serialize)]
struct CreateIntentReq<'a> {
    amount: Money,
    currency: &'a str,
    capture_method: &'a str,
    metadata: &'a IntentMetadata,
}

#[derive(Deserialize)]
struct IntentRes {
    id: String,
}

#[derive(Serialize)]
struct RefundReq {
    amount: Money,
}

/// REST client for the payment provider.
///
/// Intents are created with manual capture so the funds stay on hold until
/// the escrow is released.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    webhook_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(client: Client, base_url: String, api_key: Option<String>, webhook_secret: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            webhook_secret,
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected(format!("{status}: {body}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn provider_name(&self) -> &str {
        "http"
    }

    async fn create_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<String, GatewayError> {
        let request = self.post("/intents").json(&CreateIntentReq {
            amount,
            currency,
            capture_method: "manual",
            metadata,
        });
        let intent: IntentRes = Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if intent.id.trim().is_empty() {
            return Err(GatewayError::InvalidResponse("empty intent id".to_string()));
        }
        Ok(intent.id)
    }

    async fn hold(&self, intent_id: &str) -> Result<(), GatewayError> {
        Self::send(self.post(&format!("/intents/{intent_id}/hold"))).await?;
        Ok(())
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<(), GatewayError> {
        let request = self
            .post(&format!("/intents/{intent_id}/refunds"))
            .json(&RefundReq { amount });
        Self::send(request).await?;
        Ok(())
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(&self.webhook_secret, payload, signature)
    }
}
