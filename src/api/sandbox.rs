use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::api::signature;
use crate::app_error::GatewayError;
use crate::domain::money::Money;
use crate::domain::ports::{IntentMetadata, PaymentGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxIntentState {
    Created,
    Held,
    Refunded,
}

#[derive(Debug, Clone)]
pub struct SandboxIntent {
    pub amount: Money,
    pub refunded: Money,
    pub state: SandboxIntentState,
}

/// In-process stand-in for the payment provider. Accepts every call, keeps
/// the intents it issued and signs webhooks with the configured secret.
pub struct SandboxGateway {
    webhook_secret: String,
    intents: Mutex<HashMap<String, SandboxIntent>>,
}

impl SandboxGateway {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            intents: Mutex::new(HashMap::new()),
        }
    }

    pub fn intent(&self, intent_id: &str) -> Option<SandboxIntent> {
        self.intents.lock().ok()?.get(intent_id).cloned()
    }

    /// Signs a callback body the way the provider would.
    pub fn sign(&self, body: &[u8]) -> String {
        signature::sign(&self.webhook_secret, body)
    }

    fn with_intent<T>(
        &self,
        intent_id: &str,
        f: impl FnOnce(&mut SandboxIntent) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let mut intents = self
            .intents
            .lock()
            .map_err(|_| GatewayError::Unreachable("sandbox state poisoned".to_string()))?;
        let intent = intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::Rejected(format!("no such intent `{intent_id}`")))?;
        f(intent)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn provider_name(&self) -> &str {
        "sandbox"
    }

    async fn create_intent(
        &self,
        amount: Money,
        _currency: &str,
        _metadata: &IntentMetadata,
    ) -> Result<String, GatewayError> {
        let intent_id = format!("pi_sandbox_{}", uuid::Uuid::new_v4().simple());
        let mut intents = self
            .intents
            .lock()
            .map_err(|_| GatewayError::Unreachable("sandbox state poisoned".to_string()))?;
        intents.insert(
            intent_id.clone(),
            SandboxIntent {
                amount,
                refunded: Money::ZERO,
                state: SandboxIntentState::Created,
            },
        );
        Ok(intent_id)
    }

    async fn hold(&self, intent_id: &str) -> Result<(), GatewayError> {
        self.with_intent(intent_id, |intent| match intent.state {
            SandboxIntentState::Refunded => Err(GatewayError::Rejected(
                "intent already refunded".to_string(),
            )),
            _ => {
                intent.state = SandboxIntentState::Held;
                Ok(())
            }
        })
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<(), GatewayError> {
        self.with_intent(intent_id, |intent| {
            if intent.refunded + amount > intent.amount {
                return Err(GatewayError::Rejected(format!(
                    "refund of {amount} exceeds the remaining {}",
                    intent.amount - intent.refunded
                )));
            }
            intent.refunded += amount;
            if intent.refunded == intent.amount {
                intent.state = SandboxIntentState::Refunded;
            }
            Ok(())
        })
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(&self.webhook_secret, payload, signature)
    }
}
