use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::domain::activity::ActivityKind;
use crate::domain::dispute::{Dispute, DisputeResolution};
use crate::domain::money::Money;
use crate::domain::notification::NotificationKind;
use crate::domain::order::{Order, OrderChanges, OrderTransition};
use crate::domain::payment::{Payment, PaymentChanges, PaymentStatus, PaymentTransition};
use crate::domain::ports::{
    DisputeRepository, GatewayRef, OrderFollowUp, PaymentRepository, RepositoryRef, WebhookEffect,
    WebhookEventRepository, WebhookRecording, WebhookSettlement,
};
use crate::domain::webhook::{
    MAX_EVENT_TYPE_LEN, ProviderEvent, ProviderEventKind, WebhookAuditEntry, WebhookCompletion, WebhookEvent,
    WebhookStatus, truncate_chars,
};
use crate::services::ledger::EscrowLedger;
use crate::services::outbox::Outbox;
use crate::services::record_activity;

const MAX_AUDIT_PAGE: i64 = 200;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookReceipt {
    pub event_id: Uuid,
    pub status: WebhookStatus,
    /// The provider id was already processed; nothing was re-applied.
    pub duplicate: bool,
    pub note: Option<String>,
}

/// This delivery's ownership of an audit row.
#[derive(Debug, Clone, Copy)]
struct Claim {
    event_id: Uuid,
    claimed_at: DateTime<Utc>,
    started: Instant,
}

impl Claim {
    fn completion(&self, status: WebhookStatus, error: Option<String>) -> WebhookCompletion {
        WebhookCompletion {
            status,
            error,
            payment_id: None,
            transaction_id: None,
            processed_at: Utc::now(),
            processing_ms: self.started.elapsed().as_millis() as i64,
        }
    }
}

/// What a handler did, written back to the audit row.
#[derive(Debug)]
struct Handled {
    payment_id: Option<Uuid>,
    transaction_id: Option<String>,
    /// Set when the event was valid but its transition no longer applied.
    note: Option<String>,
    /// The audit row was closed together with the ledger movement.
    settled: bool,
}

impl Handled {
    fn applied(payment: &Payment) -> Self {
        Self {
            payment_id: Some(payment.id),
            transaction_id: payment.transaction_id.clone(),
            note: None,
            settled: false,
        }
    }

    fn settled(payment: &Payment) -> Self {
        Self {
            settled: true,
            ..Self::applied(payment)
        }
    }

    fn skipped(payment: &Payment, note: String) -> Self {
        tracing::info!(payment_id = %payment.id, "{}", note);
        Self {
            note: Some(note),
            ..Self::applied(payment)
        }
    }
}

enum Settled {
    Applied(Payment, Order),
    Skipped(PaymentStatus),
}

/// Authenticates, deduplicates and applies payment provider callbacks.
#[derive(Clone)]
pub struct WebhookProcessor {
    repo: RepositoryRef,
    gateway: GatewayRef,
    ledger: EscrowLedger,
    outbox: Outbox,
    stale_after: chrono::Duration,
}

impl WebhookProcessor {
    pub fn new(
        repo: RepositoryRef,
        gateway: GatewayRef,
        ledger: EscrowLedger,
        outbox: Outbox,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            gateway,
            ledger,
            outbox,
            stale_after,
        }
    }

    #[tracing::instrument(name = "webhook", skip_all, fields(provider = self.gateway.provider_name()))]
    pub async fn receive(&self, raw: &[u8], signature: Option<&str>) -> Result<WebhookReceipt> {
        let started = Instant::now();
        let payload = String::from_utf8_lossy(raw).into_owned();

        let signature_valid = signature.is_some_and(|sig| self.gateway.validate_signature(raw, sig));
        if !signature_valid {
            tracing::warn!(has_signature = signature.is_some(), "Rejected webhook with invalid signature");
            self.audit_rejection(None, payload, false, "invalid signature").await;
            return Err(AppError::InvalidSignature);
        }

        let event = match serde_json::from_slice::<ProviderEvent>(raw)
            .map_err(|e| e.to_string())
            .and_then(|event| event.validate().map(|_| event))
        {
            Ok(event) => event,
            Err(reason) => {
                tracing::warn!("Rejected malformed webhook: {}", reason);
                let event_type = serde_json::from_slice::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|v| {
                        v.get("type")
                            .and_then(|t| t.as_str())
                            .map(|t| truncate_chars(t, MAX_EVENT_TYPE_LEN))
                    });
                self.audit_rejection(event_type, payload, true, &reason).await;
                return Err(AppError::BadRequest(format!("malformed webhook payload: {reason}")));
            }
        };

        let now = Utc::now();
        let received = WebhookEvent::received(
            Some(event.id.clone()),
            Some(event.event_type.clone()),
            payload,
            true,
            WebhookStatus::Processing,
            now,
        );
        let audit = match self.repo.record_webhook_event(received).await? {
            WebhookRecording::Inserted(audit) => audit,
            WebhookRecording::Duplicate(existing) if existing.status == WebhookStatus::Processed => {
                tracing::info!(provider_event_id = %event.id, "Duplicate webhook, already processed");
                return Ok(WebhookReceipt {
                    event_id: existing.id,
                    status: existing.status,
                    duplicate: true,
                    note: existing.error,
                });
            }
            WebhookRecording::Duplicate(existing) => {
                match self
                    .repo
                    .reclaim_webhook_event(existing.id, now - self.stale_after, now)
                    .await?
                {
                    Some(audit) => {
                        tracing::info!(provider_event_id = %event.id, previous = %existing.status, "Reprocessing webhook");
                        audit
                    }
                    None => {
                        tracing::warn!(provider_event_id = %event.id, "Webhook is being processed by another delivery");
                        return Err(AppError::Other(anyhow!(
                            "event {} is still being processed, retry later",
                            event.id
                        )));
                    }
                }
            }
        };
        let claim = Claim {
            event_id: audit.id,
            claimed_at: audit.claimed_at,
            started,
        };

        match self.dispatch(&claim, &event).await {
            Ok(handled) => {
                if !handled.settled {
                    let completion = WebhookCompletion {
                        payment_id: handled.payment_id,
                        transaction_id: handled.transaction_id,
                        ..claim.completion(WebhookStatus::Processed, handled.note.clone())
                    };
                    self.finish(&claim, &event, completion).await?;
                }
                tracing::info!(
                    provider_event_id = %event.id,
                    event_type = %event.event_type,
                    processing_ms = claim.started.elapsed().as_millis() as i64,
                    "Webhook processed"
                );
                Ok(WebhookReceipt {
                    event_id: audit.id,
                    status: WebhookStatus::Processed,
                    duplicate: false,
                    note: handled.note,
                })
            }
            Err(err) => {
                tracing::error!(provider_event_id = %event.id, event_type = %event.event_type, "Webhook handler failed: {}", err);
                let completion = WebhookCompletion {
                    transaction_id: event.data.transaction_id.clone(),
                    ..claim.completion(WebhookStatus::Failed, Some(err.to_string()))
                };
                self.finish(&claim, &event, completion).await?;
                Err(AppError::Other(anyhow!(
                    "processing event {} failed: {err}",
                    event.id
                )))
            }
        }
    }

    /// Newest audit rows first, at most `limit` of them.
    pub async fn recent_events(&self, limit: i64) -> Result<Vec<WebhookAuditEntry>> {
        let events = self
            .repo
            .recent_webhook_events(limit.clamp(1, MAX_AUDIT_PAGE))
            .await?;
        Ok(events.into_iter().map(WebhookAuditEntry::from).collect())
    }

    /// Rows for rejected callbacks carry no provider id.
    async fn audit_rejection(&self, event_type: Option<String>, payload: String, signature_valid: bool, reason: &str) {
        let now = Utc::now();
        let mut event = WebhookEvent::received(None, event_type, payload, signature_valid, WebhookStatus::Failed, now);
        event.error = Some(reason.to_string());
        event.processed_at = Some(now);
        event.processing_ms = Some(0);
        if let Err(err) = self.repo.record_webhook_event(event).await {
            tracing::error!("Failed to audit rejected webhook: {}", err);
        }
    }

    /// Closes the audit row, provided this delivery still owns it.
    async fn finish(&self, claim: &Claim, event: &ProviderEvent, completion: WebhookCompletion) -> Result<()> {
        match self
            .repo
            .complete_webhook_event(claim.event_id, claim.claimed_at, completion)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(event_id = %claim.event_id, "Webhook claim was taken over before completion");
                Err(AppError::Other(anyhow!(
                    "event {} was taken over by another delivery",
                    event.id
                )))
            }
            Err(err) => {
                tracing::error!(event_id = %claim.event_id, "Failed to finish webhook audit row: {}", err);
                Err(AppError::Other(anyhow!(
                    "event {} handled but its audit row could not be updated: {err}",
                    event.id
                )))
            }
        }
    }

    /// Applies a ledger movement and closes the audit row as one store write.
    async fn settle(&self, claim: &Claim, event: &ProviderEvent, effect: WebhookEffect) -> Result<Settled> {
        let completion = claim.completion(WebhookStatus::Processed, None);
        match self
            .repo
            .settle_webhook_event(claim.event_id, claim.claimed_at, effect, completion)
            .await?
        {
            WebhookSettlement::Applied { payment, order } => Ok(Settled::Applied(payment, order)),
            WebhookSettlement::PaymentMoved(status) => Ok(Settled::Skipped(status)),
            WebhookSettlement::ClaimLost => {
                tracing::warn!(event_id = %claim.event_id, "Webhook claim was taken over before settlement");
                Err(AppError::Other(anyhow!(
                    "event {} was taken over by another delivery",
                    event.id
                )))
            }
        }
    }

    async fn dispatch(&self, claim: &Claim, event: &ProviderEvent) -> Result<Handled> {
        let intent_id = &event.data.intent_id;
        let payment = self
            .repo
            .find_payment_by_intent(intent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for intent {intent_id}")))?;

        match event.kind() {
            ProviderEventKind::AuthorizationSucceeded => self.on_authorized(event, payment).await,
            ProviderEventKind::CaptureSucceeded => self.on_captured(claim, event, payment).await,
            ProviderEventKind::RefundSucceeded | ProviderEventKind::Reversal => {
                self.on_refunded(claim, event, payment).await
            }
            ProviderEventKind::PaymentFailed => self.on_failed(claim, event, payment).await,
        }
    }

    async fn on_authorized(&self, event: &ProviderEvent, payment: Payment) -> Result<Handled> {
        if payment.status != PaymentStatus::Authorized {
            return Ok(Handled::skipped(
                &payment,
                format!("authorization ignored, payment is `{}`", payment.status),
            ));
        }
        let payment = match &event.data.transaction_id {
            Some(transaction_id) => self.ledger.link_transaction(&payment, transaction_id.clone()).await?,
            None => payment,
        };
        record_activity(
            &self.repo,
            payment.order_id,
            None,
            ActivityKind::PaymentAuthorized,
            "Payment authorized by the provider",
        )
        .await;
        Ok(Handled::applied(&payment))
    }

    async fn on_captured(&self, claim: &Claim, event: &ProviderEvent, payment: Payment) -> Result<Handled> {
        let captured_at = Utc::now();
        let effect = WebhookEffect {
            order: Some(OrderFollowUp::TransitionOrAnnotate(
                OrderTransition::Confirm,
                OrderChanges {
                    paid_at: Some(captured_at),
                    ..Default::default()
                },
            )),
            ..self
                .ledger
                .capture(&payment, event.data.transaction_id.clone(), captured_at)
        };
        let (payment, order) = match self.settle(claim, event, effect).await? {
            Settled::Applied(payment, order) => (payment, order),
            Settled::Skipped(status) => {
                return Ok(Handled::skipped(
                    &payment,
                    format!("capture not re-applied, payment is `{status}`"),
                ));
            }
        };
        tracing::info!(payment_id = %payment.id, order_id = %order.id, "Payment captured into escrow");

        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::PaymentCaptured,
            format!("{} {} captured into escrow", payment.amount, order.currency),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::PaymentCaptured);
        Ok(Handled::settled(&payment))
    }

    async fn on_refunded(&self, claim: &Claim, event: &ProviderEvent, payment: Payment) -> Result<Handled> {
        let amount = match event.data.amount {
            Some(amount) => Money::positive(amount)?,
            None => payment.remaining(),
        };
        if payment.status == PaymentStatus::Frozen
            && let Some(dispute) = self.repo.find_active_dispute(payment.order_id).await?
        {
            return self.refund_disputed(payment, dispute, amount).await;
        }

        let effect = self.ledger.record_refund(&payment, amount);
        let effect = WebhookEffect {
            order: (effect.transition == PaymentTransition::Refund)
                .then(|| OrderFollowUp::Transition(OrderTransition::Refund, OrderChanges::default())),
            ..effect
        };
        let (updated, order) = match self.settle(claim, event, effect).await? {
            Settled::Applied(payment, order) => (payment, order),
            Settled::Skipped(status) => {
                return Ok(Handled::skipped(
                    &payment,
                    format!("refund not re-applied, payment is `{status}`"),
                ));
            }
        };
        tracing::info!(
            payment_id = %updated.id,
            refunded = %updated.refunded_amount,
            status = %updated.status,
            order_status = %order.status,
            "Refund recorded"
        );

        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::PaymentRefunded,
            format!(
                "{} refunded ({} of {} in total)",
                amount, updated.refunded_amount, updated.amount
            ),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::PaymentRefunded);
        Ok(Handled::settled(&updated))
    }

    /// A provider-side refund of frozen funds settles the active dispute in
    /// the buyer's favour. Partial refunds are left to the dispute process.
    async fn refund_disputed(&self, payment: Payment, dispute: Dispute, amount: Money) -> Result<Handled> {
        if amount < payment.remaining() {
            tracing::warn!(payment_id = %payment.id, dispute_id = %dispute.id, %amount, "Partial refund of disputed escrow");
            return Ok(Handled::skipped(
                &payment,
                format!(
                    "partial refund of {amount} not applied, escrow is frozen by dispute {}",
                    dispute.id
                ),
            ));
        }

        let changes = PaymentChanges {
            refunded_amount: Some(payment.amount),
            ..Default::default()
        };
        let Some((dispute, payment, order)) = self
            .repo
            .resolve_dispute(dispute.id, payment.id, DisputeResolution::Refund, changes, Utc::now())
            .await?
        else {
            return Err(AppError::BusinessRule(format!(
                "dispute {} changed while the provider refund was applied",
                dispute.id
            )));
        };
        tracing::info!(dispute_id = %dispute.id, order_id = %order.id, "Dispute resolved by provider refund");

        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::DisputeResolved,
            "Dispute resolved: refund issued by the payment provider",
        )
        .await;
        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::PaymentRefunded,
            format!("{} refunded in full", payment.refunded_amount),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::DisputeResolved);
        self.outbox.publish(&order, NotificationKind::PaymentRefunded);
        Ok(Handled::applied(&payment))
    }

    async fn on_failed(&self, claim: &Claim, event: &ProviderEvent, payment: Payment) -> Result<Handled> {
        let reason = event
            .data
            .reason
            .clone()
            .unwrap_or_else(|| format!("provider reported `{}`", event.event_type));
        let effect = WebhookEffect {
            order: Some(OrderFollowUp::Transition(
                OrderTransition::Cancel,
                OrderChanges::with_reason(format!("Payment failed: {reason}")),
            )),
            ..self.ledger.fail(&payment, reason.clone())
        };
        let (failed, order) = match self.settle(claim, event, effect).await? {
            Settled::Applied(payment, order) => (payment, order),
            Settled::Skipped(status) => {
                return Ok(Handled::skipped(
                    &payment,
                    format!("failure ignored, payment is `{status}`"),
                ));
            }
        };
        tracing::warn!(payment_id = %failed.id, order_status = %order.status, %reason, "Payment failed");

        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::PaymentFailed,
            format!("Payment failed: {reason}"),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::PaymentFailed);
        Ok(Handled::settled(&failed))
    }
}
