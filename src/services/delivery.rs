use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::domain::activity::ActivityKind;
use crate::domain::delivery::{
    Delivery, DeliveryChanges, DeliveryStage, DeliveryTransition, PhotoUpload, Verification,
};
use crate::domain::dispute::Dispute;
use crate::domain::notification::NotificationKind;
use crate::domain::order::{Order, OrderChanges, OrderStatus, OrderTransition};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    DeliveryRepository, DisputeRepository, OrderRepository, PaymentRepository, RepositoryRef,
};
use crate::services::disputes::DisputeManager;
use crate::services::ledger::{EscrowLedger, ReleaseOutcome};
use crate::services::outbox::Outbox;
use crate::services::record_activity;

/// What the supplier hands over as proof of delivery.
#[derive(Debug, Clone)]
pub enum SupplierProof {
    Pin(String),
    Photo(PhotoUpload),
}

#[derive(Debug, Clone)]
pub enum BuyerDecision {
    Accept,
    /// The buyer reports a problem, which opens a dispute.
    Reject { reason: String },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuyerConfirmationOutcome {
    /// Delivery accepted and escrow paid out to the supplier.
    Released {
        order: Order,
        delivery: Delivery,
        payment: Payment,
    },
    /// Delivery accepted, but a dispute is active so the funds stay put.
    ReleaseWithheld {
        order: Order,
        delivery: Delivery,
        dispute_id: Uuid,
    },
    Disputed {
        dispute: Dispute,
        order: Order,
        payment: Payment,
    },
}

/// Dual confirmation of a delivery: supplier first, then buyer.
#[derive(Clone)]
pub struct DeliveryConfirmationGate {
    repo: RepositoryRef,
    ledger: EscrowLedger,
    disputes: DisputeManager,
    outbox: Outbox,
}

impl DeliveryConfirmationGate {
    pub fn new(repo: RepositoryRef, ledger: EscrowLedger, disputes: DisputeManager, outbox: Outbox) -> Self {
        Self {
            repo,
            ledger,
            disputes,
            outbox,
        }
    }

    pub async fn supplier_confirm(&self, actor_id: Uuid, order_id: Uuid, proof: SupplierProof) -> Result<Delivery> {
        let (order, delivery) = self.load(order_id).await?;
        if !order.is_supplier(actor_id) {
            return Err(AppError::ForbiddenResource(
                "only the order's supplier can confirm the handover".to_string(),
            ));
        }
        self.ensure_no_active_dispute(order_id).await?;
        match delivery.stage {
            DeliveryStage::AwaitingSupplierConfirmation => {}
            DeliveryStage::Disputed => {
                return Err(AppError::BusinessRule("delivery is disputed".to_string()));
            }
            _ => {
                return Err(AppError::BusinessRule("supplier already confirmed".to_string()));
            }
        }
        if order.status != OrderStatus::Confirmed {
            return Err(AppError::BusinessRule(format!(
                "an order in `{}` cannot be handed over",
                order.status
            )));
        }

        let now = Utc::now();
        let mut changes = DeliveryChanges {
            supplier_confirmed_at: Some(now),
            ..Default::default()
        };
        match (&delivery.verification, proof) {
            (Verification::Pin { code, .. }, SupplierProof::Pin(given)) => {
                if given != code.as_str() {
                    tracing::warn!(%order_id, "Supplier entered an incorrect delivery PIN");
                    return Err(AppError::BusinessRule("incorrect PIN".to_string()));
                }
                changes.pin_verified = true;
            }
            (Verification::Photo { .. }, SupplierProof::Photo(upload)) => {
                changes.photo = Some(upload.validate()?);
            }
            (verification, _) => {
                return Err(AppError::BadRequest(format!(
                    "this delivery must be confirmed with a {}",
                    verification.method()
                )));
            }
        }

        let delivery = self
            .repo
            .transition_delivery(delivery.id, DeliveryTransition::SupplierConfirm, changes)
            .await?
            .ok_or_else(|| AppError::BusinessRule("supplier already confirmed".to_string()))?;
        tracing::info!(%order_id, delivery_id = %delivery.id, "Supplier confirmed delivery");

        let order = self
            .advance_order(order_id, OrderTransition::AwaitBuyerConfirmation, "supplier confirmation")
            .await?;

        record_activity(
            &self.repo,
            order_id,
            Some(actor_id),
            ActivityKind::SupplierConfirmed,
            format!("Supplier confirmed delivery by {}", delivery.verification.method()),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::SupplierConfirmedDelivery);
        Ok(delivery)
    }

    pub async fn buyer_confirm(
        &self,
        actor_id: Uuid,
        order_id: Uuid,
        decision: BuyerDecision,
    ) -> Result<BuyerConfirmationOutcome> {
        let (order, delivery) = self.load(order_id).await?;
        if !order.is_buyer(actor_id) {
            return Err(AppError::ForbiddenResource(
                "only the order's buyer can confirm delivery".to_string(),
            ));
        }
        match delivery.stage {
            DeliveryStage::AwaitingBuyerConfirmation => {}
            DeliveryStage::AwaitingSupplierConfirmation => {
                return Err(AppError::BusinessRule("supplier must confirm first".to_string()));
            }
            DeliveryStage::Confirmed => {
                return Err(AppError::BusinessRule("buyer already confirmed".to_string()));
            }
            DeliveryStage::Disputed => {
                return Err(AppError::BusinessRule("delivery is disputed".to_string()));
            }
        }

        match decision {
            BuyerDecision::Accept => self.accept(actor_id, order, delivery).await,
            BuyerDecision::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(AppError::BadRequest(
                        "rejecting a delivery needs a reason".to_string(),
                    ));
                }
                let opened = self.disputes.open(actor_id, order_id, &reason).await?;
                Ok(BuyerConfirmationOutcome::Disputed {
                    dispute: opened.dispute,
                    order: opened.order,
                    payment: opened.payment,
                })
            }
        }
    }

    async fn accept(&self, actor_id: Uuid, order: Order, delivery: Delivery) -> Result<BuyerConfirmationOutcome> {
        let order_id = order.id;
        let payment = self
            .repo
            .find_payment_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for order {order_id}")))?;
        if payment.status != PaymentStatus::Held {
            return Err(AppError::BusinessRule(format!(
                "escrow is `{}`, funds must be held before delivery can be accepted",
                payment.status
            )));
        }

        let changes = DeliveryChanges {
            buyer_confirmed_at: Some(Utc::now()),
            ..Default::default()
        };
        let delivery = self
            .repo
            .transition_delivery(delivery.id, DeliveryTransition::BuyerConfirm, changes)
            .await?
            .ok_or_else(|| AppError::BusinessRule("buyer already confirmed".to_string()))?;
        tracing::info!(%order_id, delivery_id = %delivery.id, "Buyer accepted delivery");

        let order = self
            .advance_order(order_id, OrderTransition::MarkDelivered, "buyer confirmation")
            .await?;
        record_activity(
            &self.repo,
            order_id,
            Some(actor_id),
            ActivityKind::BuyerConfirmed,
            "Buyer accepted the delivery",
        )
        .await;
        self.outbox.publish(&order, NotificationKind::DeliveryCompleted);

        let active = self.repo.find_active_dispute(order_id).await.map_err(|err| {
            AppError::PartialFailure(format!(
                "delivery of order {order_id} accepted but the dispute check failed: {err}"
            ))
        })?;
        if let Some(dispute) = active {
            tracing::warn!(%order_id, dispute_id = %dispute.id, "Release withheld, dispute is active");
            record_activity(
                &self.repo,
                order_id,
                None,
                ActivityKind::ReleaseWithheld,
                format!("Escrow release withheld by dispute {}", dispute.id),
            )
            .await;
            return Ok(BuyerConfirmationOutcome::ReleaseWithheld {
                order,
                delivery,
                dispute_id: dispute.id,
            });
        }

        let (payment, order) = match self.ledger.release(payment.id, order_id).await {
            Ok(ReleaseOutcome::Released { payment, order }) => (payment, order),
            Ok(ReleaseOutcome::AlreadyReleased { payment }) => (payment, order),
            Err(err) => {
                tracing::error!(%order_id, "Delivery accepted but escrow not released: {}", err);
                return Err(AppError::PartialFailure(format!(
                    "delivery of order {order_id} accepted but escrow could not be released: {err}"
                )));
            }
        };
        record_activity(
            &self.repo,
            order_id,
            None,
            ActivityKind::EscrowReleased,
            format!("Released {} {} to the supplier", payment.amount, order.currency),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::EscrowReleased);

        Ok(BuyerConfirmationOutcome::Released {
            order,
            delivery,
            payment,
        })
    }

    async fn load(&self, order_id: Uuid) -> Result<(Order, Delivery)> {
        let order = self
            .repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        let delivery = self
            .repo
            .find_delivery_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Delivery for order {order_id}")))?;
        Ok((order, delivery))
    }

    async fn ensure_no_active_dispute(&self, order_id: Uuid) -> Result<()> {
        match self.repo.find_active_dispute(order_id).await? {
            Some(dispute) => Err(AppError::BusinessRule(format!(
                "order has an active dispute ({})",
                dispute.id
            ))),
            None => Ok(()),
        }
    }

    /// The delivery write already happened, so any failure here leaves the
    /// aggregate half-moved and is reported as such.
    async fn advance_order(&self, order_id: Uuid, transition: OrderTransition, step: &str) -> Result<Order> {
        match self
            .repo
            .transition_order(order_id, transition, OrderChanges::default())
            .await
        {
            Ok(Some(order)) => Ok(order),
            Ok(None) => {
                tracing::error!(%order_id, ?transition, "Order status guard failed after {}", step);
                Err(AppError::PartialFailure(format!(
                    "{step} recorded but order {order_id} could not move to `{}`",
                    transition.target()
                )))
            }
            Err(err) => {
                tracing::error!(%order_id, ?transition, "Order update failed after {}: {}", step, err);
                Err(AppError::PartialFailure(format!(
                    "{step} recorded but order {order_id} could not be updated: {err}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delivery::Recipient;
    use crate::domain::order::DeliveryWindow;
    use chrono::{NaiveDate, NaiveTime};

    fn order() -> Order {
        let now = Utc::now();
        let money = |v| crate::domain::money::Money::new(v).unwrap();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20300101-ABC123".into(),
            buyer_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            status: OrderStatus::Delivered,
            subtotal: money(rust_decimal_macros::dec!(190.00)),
            delivery_fee: money(rust_decimal_macros::dec!(10.00)),
            total: money(rust_decimal_macros::dec!(200.00)),
            currency: "USD".into(),
            delivery_window: delivery(DeliveryStage::Confirmed).window,
            delivery_address: crate::domain::order::DeliveryAddress {
                line: "Rua A, 10".into(),
                latitude: -23.5,
                longitude: -46.6,
            },
            vehicle_type: "van".into(),
            cancellation_reason: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn delivery(stage: DeliveryStage) -> Delivery {
        let now = Utc::now();
        Delivery {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            stage,
            window: DeliveryWindow {
                date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                starts_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                ends_at: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            },
            recipient: Recipient {
                name: "Ana".into(),
                phone: "+5511999990000".into(),
            },
            verification: Verification::Pin {
                code: "4821".into(),
                verified: false,
            },
            supplier_confirmed_at: None,
            buyer_confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_supplier_then_buyer_keeps_confirmation_order() {
        let mut d = delivery(DeliveryStage::AwaitingSupplierConfirmation);
        let supplier_at = Utc::now();
        d.apply(
            DeliveryTransition::SupplierConfirm,
            &DeliveryChanges {
                supplier_confirmed_at: Some(supplier_at),
                pin_verified: true,
                ..Default::default()
            },
            supplier_at,
        );
        assert_eq!(d.stage, DeliveryStage::AwaitingBuyerConfirmation);
        assert!(d.confirmation_order_holds());

        let buyer_at = supplier_at + chrono::Duration::minutes(5);
        d.apply(
            DeliveryTransition::BuyerConfirm,
            &DeliveryChanges {
                buyer_confirmed_at: Some(buyer_at),
                ..Default::default()
            },
            buyer_at,
        );
        assert_eq!(d.stage, DeliveryStage::Confirmed);
        assert!(d.confirmation_order_holds());
        assert_eq!(d.verification, Verification::Pin { code: "4821".into(), verified: true });
    }

    #[test]
    fn test_buyer_without_supplier_breaks_confirmation_order() {
        let mut d = delivery(DeliveryStage::AwaitingBuyerConfirmation);
        d.buyer_confirmed_at = Some(Utc::now());
        assert!(!d.confirmation_order_holds());
    }

    #[test]
    fn test_outcome_is_tagged() {
        let d = delivery(DeliveryStage::Confirmed);
        let dispute_id = Uuid::new_v4();
        let json = serde_json::to_value(BuyerConfirmationOutcome::ReleaseWithheld {
            order: order(),
            delivery: d.redacted(),
            dispute_id,
        })
        .unwrap();
        assert_eq!(json["outcome"], "release_withheld");
        assert_eq!(json["delivery"]["verification"]["code"], "****");
        assert_eq!(json["dispute_id"], dispute_id.to_string());
    }
}
