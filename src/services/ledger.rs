use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::domain::money::Money;
use crate::domain::order::Order;
use crate::domain::payment::{Payment, PaymentChanges, PaymentStatus, PaymentTransition};
use crate::domain::ports::{PaymentRepository, RepositoryRef, WebhookEffect};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released { payment: Payment, order: Order },
    /// A previous attempt already released the funds.
    AlreadyReleased { payment: Payment },
}

/// Escrow state machine over [`Payment`].
///
/// Guards are enforced by the repository's conditional updates and surface as
/// business rule errors. Movements driven by provider callbacks are returned
/// as a [`WebhookEffect`] and settled together with their audit row.
#[derive(Clone)]
pub struct EscrowLedger {
    repo: RepositoryRef,
    release_delay: chrono::Duration,
}

impl EscrowLedger {
    pub fn new(repo: RepositoryRef, release_delay: chrono::Duration) -> Self {
        Self { repo, release_delay }
    }

    /// `authorized → held`, stamping the earliest release time.
    pub fn capture(
        &self,
        payment: &Payment,
        transaction_id: Option<String>,
        captured_at: DateTime<Utc>,
    ) -> WebhookEffect {
        WebhookEffect {
            payment_id: payment.id,
            transition: PaymentTransition::Capture,
            changes: PaymentChanges {
                transaction_id,
                captured_at: Some(captured_at),
                release_eligible_at: Some(captured_at + self.release_delay),
                ..Default::default()
            },
            order: None,
        }
    }

    pub async fn link_transaction(&self, payment: &Payment, transaction_id: String) -> Result<Payment> {
        self.repo
            .annotate_payment(
                payment.id,
                PaymentChanges {
                    transaction_id: Some(transaction_id),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", payment.id)))
    }

    /// `held → released` together with `delivered → completed`.
    ///
    /// Releasing twice is not an error: the second call reports
    /// [`ReleaseOutcome::AlreadyReleased`].
    pub async fn release(&self, payment_id: Uuid, order_id: Uuid) -> Result<ReleaseOutcome> {
        let payment = self.find(payment_id, order_id).await?;
        if payment.status == PaymentStatus::Released {
            return Ok(ReleaseOutcome::AlreadyReleased { payment });
        }
        PaymentTransition::Release.check(payment.status)?;

        match self.repo.release_escrow(payment_id, order_id, Utc::now()).await? {
            Some((payment, order)) => {
                tracing::info!(%payment_id, %order_id, amount = %payment.amount, "Escrow released");
                Ok(ReleaseOutcome::Released { payment, order })
            }
            None => {
                // Lost a race: either someone else released or the state moved.
                let current = self.find(payment_id, order_id).await?;
                if current.status == PaymentStatus::Released {
                    return Ok(ReleaseOutcome::AlreadyReleased { payment: current });
                }
                Err(AppError::BusinessRule(format!(
                    "escrow cannot be released: payment is `{}`",
                    current.status
                )))
            }
        }
    }

    /// `held → frozen`.
    pub async fn freeze(&self, payment: &Payment) -> Result<Payment> {
        PaymentTransition::Freeze.check(payment.status)?;
        self.repo
            .transition_payment(payment.id, PaymentTransition::Freeze, PaymentChanges::default())
            .await?
            .ok_or_else(|| {
                AppError::BusinessRule("payment is no longer held and cannot be frozen".to_string())
            })
    }

    /// Adds `amount` to the refunded total: `refunded` once everything is
    /// back with the buyer, `partially_refunded` before that.
    pub fn record_refund(&self, payment: &Payment, amount: Money) -> WebhookEffect {
        let refunded = (payment.refunded_amount + amount).min(payment.amount);
        let transition = if refunded >= payment.amount {
            PaymentTransition::Refund
        } else {
            PaymentTransition::PartialRefund
        };
        WebhookEffect {
            payment_id: payment.id,
            transition,
            changes: PaymentChanges {
                refunded_amount: Some(refunded),
                ..Default::default()
            },
            order: None,
        }
    }

    /// Full refund of an uncaptured or held payment, e.g. on cancellation.
    pub async fn refund_in_full(&self, payment: &Payment) -> Result<Option<Payment>> {
        let changes = PaymentChanges {
            refunded_amount: Some(payment.amount),
            ..Default::default()
        };
        Ok(self
            .repo
            .transition_payment(payment.id, PaymentTransition::Refund, changes)
            .await?)
    }

    /// `authorized → failed`.
    pub fn fail(&self, payment: &Payment, reason: impl Into<String>) -> WebhookEffect {
        WebhookEffect {
            payment_id: payment.id,
            transition: PaymentTransition::Fail,
            changes: PaymentChanges {
                failure_reason: Some(reason.into()),
                ..Default::default()
            },
            order: None,
        }
    }

    async fn find(&self, payment_id: Uuid, order_id: Uuid) -> Result<Payment> {
        self.repo
            .find_payment_by_order(order_id)
            .await?
            .filter(|p| p.id == payment_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment {payment_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn ledger() -> EscrowLedger {
        EscrowLedger::new(Arc::new(InMemoryStore::new()), chrono::Duration::hours(24))
    }

    fn held(amount: Money, refunded: Money) -> Payment {
        let mut payment = Payment::new(Uuid::new_v4(), "sandbox", "pi_1", amount, "USD", Utc::now());
        payment.status = PaymentStatus::Held;
        payment.refunded_amount = refunded;
        payment
    }

    #[test]
    fn test_refund_effect_caps_at_the_payment_amount() {
        let amount = Money::new(dec!(45.00)).unwrap();
        let partial = ledger().record_refund(&held(amount, Money::ZERO), Money::new(dec!(10.00)).unwrap());
        assert_eq!(partial.transition, PaymentTransition::PartialRefund);
        assert_eq!(partial.changes.refunded_amount, Money::new(dec!(10.00)).ok());

        let over = ledger().record_refund(
            &held(amount, Money::new(dec!(40.00)).unwrap()),
            Money::new(dec!(10.00)).unwrap(),
        );
        assert_eq!(over.transition, PaymentTransition::Refund);
        assert_eq!(over.changes.refunded_amount, Some(amount));
    }

    #[test]
    fn test_capture_effect_stamps_release_time() {
        let captured_at = Utc::now();
        let payment = held(Money::new(dec!(45.00)).unwrap(), Money::ZERO);
        let effect = ledger().capture(&payment, Some("txn_1".into()), captured_at);
        assert_eq!(effect.transition, PaymentTransition::Capture);
        assert_eq!(
            effect.changes.release_eligible_at,
            Some(captured_at + chrono::Duration::hours(24))
        );
        assert!(effect.order.is_none());
    }
}
