use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Column widths of `webhook_events` and `payments`.
pub const MAX_EVENT_ID_LEN: usize = 128;
pub const MAX_EVENT_TYPE_LEN: usize = 64;
pub const MAX_REFERENCE_LEN: usize = 128;

status_enum! {
    WebhookStatus {
        Processing => "processing",
        Processed => "processed",
        Failed => "failed",
    }
}

/// Audit row for every provider callback received, valid or not.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WebhookEvent {
    pub id: Uuid,
    /// Dedupe key. Left empty for callbacks that failed authentication or
    /// parsing, so they can never shadow a genuine delivery.
    pub provider_event_id: Option<String>,
    pub event_type: Option<String>,
    pub payload: String,
    pub signature_valid: bool,
    pub status: WebhookStatus,
    pub error: Option<String>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Last time a delivery took ownership of processing this event.
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<i64>,
}

impl WebhookEvent {
    pub fn received(
        provider_event_id: Option<String>,
        event_type: Option<String>,
        payload: String,
        signature_valid: bool,
        status: WebhookStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_event_id,
            event_type,
            payload,
            signature_valid,
            status,
            error: None,
            payment_id: None,
            transaction_id: None,
            received_at: now,
            claimed_at: now,
            processed_at: None,
            processing_ms: None,
        }
    }

    /// Payment and transaction references are kept when the completion
    /// carries none.
    pub fn complete(&mut self, completion: WebhookCompletion) {
        self.status = completion.status;
        self.error = completion.error;
        self.payment_id = completion.payment_id.or(self.payment_id);
        self.transaction_id = completion.transaction_id.or(self.transaction_id.take());
        self.processed_at = Some(completion.processed_at);
        self.processing_ms = Some(completion.processing_ms);
    }
}

/// An audit row as listed to operators. The raw payload stays in storage.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WebhookAuditEntry {
    pub id: Uuid,
    pub provider_event_id: Option<String>,
    pub event_type: Option<String>,
    pub signature_valid: bool,
    pub status: WebhookStatus,
    pub error: Option<String>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<i64>,
}

impl From<WebhookEvent> for WebhookAuditEntry {
    fn from(event: WebhookEvent) -> Self {
        Self {
            id: event.id,
            provider_event_id: event.provider_event_id,
            event_type: event.event_type,
            signature_valid: event.signature_valid,
            status: event.status,
            error: event.error,
            payment_id: event.payment_id,
            transaction_id: event.transaction_id,
            received_at: event.received_at,
            processed_at: event.processed_at,
            processing_ms: event.processing_ms,
        }
    }
}

/// Final bookkeeping for an audit row.
#[derive(Debug, Clone)]
pub struct WebhookCompletion {
    pub status: WebhookStatus,
    pub error: Option<String>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub processing_ms: i64,
}

/// Provider-agnostic callback envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ProviderEventData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventData {
    pub intent_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    AuthorizationSucceeded,
    CaptureSucceeded,
    RefundSucceeded,
    Reversal,
    /// Every type not recognised as a success.
    PaymentFailed,
}

impl ProviderEventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment.authorized" => ProviderEventKind::AuthorizationSucceeded,
            "payment.captured" => ProviderEventKind::CaptureSucceeded,
            "payment.refunded" => ProviderEventKind::RefundSucceeded,
            "payment.reversed" => ProviderEventKind::Reversal,
            _ => ProviderEventKind::PaymentFailed,
        }
    }
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        ProviderEventKind::from_type(&self.event_type)
    }

    /// Shape checks beyond what deserialisation enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("event id is empty".to_string());
        }
        if self.event_type.trim().is_empty() {
            return Err("event type is empty".to_string());
        }
        if self.data.intent_id.trim().is_empty() {
            return Err("intent id is empty".to_string());
        }
        check_len("event id", &self.id, MAX_EVENT_ID_LEN)?;
        check_len("event type", &self.event_type, MAX_EVENT_TYPE_LEN)?;
        check_len("intent id", &self.data.intent_id, MAX_REFERENCE_LEN)?;
        if let Some(transaction_id) = &self.data.transaction_id {
            check_len("transaction id", transaction_id, MAX_REFERENCE_LEN)?;
        }
        if let Some(amount) = self.data.amount
            && amount <= Decimal::ZERO
        {
            return Err(format!("amount must be positive, got {amount}"));
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("{field} is {len} characters long, at most {max} allowed"));
    }
    Ok(())
}

/// Cuts `value` to at most `max` characters.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
