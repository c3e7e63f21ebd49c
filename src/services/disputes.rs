use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::domain::activity::ActivityKind;
use crate::domain::delivery::{DeliveryChanges, DeliveryStage, DeliveryTransition};
use crate::domain::dispute::{Dispute, DisputeResolution};
use crate::domain::notification::NotificationKind;
use crate::domain::order::Order;
use crate::domain::payment::{Payment, PaymentChanges};
use crate::domain::ports::{
    DeliveryRepository, DisputeOpening, DisputeRepository, GatewayRef, OrderRepository, PaymentRepository,
    RepositoryRef,
};
use crate::services::outbox::Outbox;
use crate::services::record_activity;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenedDispute {
    pub dispute: Dispute,
    pub order: Order,
    pub payment: Payment,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResolvedDispute {
    pub dispute: Dispute,
    pub order: Order,
    pub payment: Payment,
}

/// Opens disputes, freezing the escrow, and applies the outcome of the
/// administrative resolution process.
#[derive(Clone)]
pub struct DisputeManager {
    repo: RepositoryRef,
    gateway: GatewayRef,
    outbox: Outbox,
}

impl DisputeManager {
    pub fn new(repo: RepositoryRef, gateway: GatewayRef, outbox: Outbox) -> Self {
        Self { repo, gateway, outbox }
    }

    /// Either party may open a dispute once the supplier has confirmed.
    pub async fn open(&self, actor_id: Uuid, order_id: Uuid, reason: &str) -> Result<OpenedDispute> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest("a dispute needs a reason".to_string()));
        }
        let order = self
            .repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        if !order.is_party(actor_id) {
            return Err(AppError::ForbiddenResource(
                "only the buyer or the supplier can dispute this order".to_string(),
            ));
        }
        let payment = self
            .repo
            .find_payment_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for order {order_id}")))?;

        let dispute = Dispute::open(order_id, actor_id, reason, Utc::now());
        let opened = match self.repo.open_dispute(dispute, payment.id).await? {
            DisputeOpening::Opened {
                dispute,
                payment,
                order,
            } => OpenedDispute {
                dispute,
                order,
                payment,
            },
            DisputeOpening::ActiveDisputeExists(active) => {
                tracing::warn!(%order_id, dispute_id = %active.id, "Dispute already active");
                return Err(AppError::BusinessRule(format!(
                    "order already has an active dispute ({})",
                    active.id
                )));
            }
            DisputeOpening::OrderNotDisputable(status) => {
                return Err(AppError::BusinessRule(format!(
                    "an order in `{status}` cannot be disputed"
                )));
            }
            DisputeOpening::PaymentNotHeld(status) => {
                return Err(AppError::BusinessRule(format!(
                    "escrow is `{status}`, only held funds can be frozen"
                )));
            }
        };

        tracing::info!(%order_id, dispute_id = %opened.dispute.id, opened_by = %actor_id, "Dispute opened, escrow frozen");
        record_activity(
            &self.repo,
            order_id,
            Some(actor_id),
            ActivityKind::DisputeOpened,
            format!("Dispute opened: {reason}"),
        )
        .await;
        self.outbox.publish(&opened.order, NotificationKind::DisputeOpened);

        self.mark_delivery_disputed(order_id).await?;
        Ok(opened)
    }

    /// A delivery still waiting on the buyer moves to `disputed` as well.
    async fn mark_delivery_disputed(&self, order_id: Uuid) -> Result<()> {
        let delivery = match self.repo.find_delivery_by_order(order_id).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return Ok(()),
            Err(err) => {
                return Err(AppError::PartialFailure(format!(
                    "dispute opened for order {order_id} but its delivery could not be read: {err}"
                )));
            }
        };
        if delivery.stage != DeliveryStage::AwaitingBuyerConfirmation {
            return Ok(());
        }
        match self
            .repo
            .transition_delivery(delivery.id, DeliveryTransition::Dispute, DeliveryChanges::default())
            .await
        {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                tracing::warn!(%order_id, "Delivery left `awaiting_buyer_confirmation` before it could be disputed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(%order_id, "Dispute opened but delivery not marked: {}", err);
                Err(AppError::PartialFailure(format!(
                    "dispute opened for order {order_id} but the delivery could not be marked disputed: {err}"
                )))
            }
        }
    }

    /// Applies an administrative outcome. The dispute, payment and order
    /// change together or not at all.
    pub async fn resolve(&self, dispute_id: Uuid, resolution: DisputeResolution) -> Result<ResolvedDispute> {
        let dispute = self
            .repo
            .find_dispute(dispute_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Dispute {dispute_id}")))?;
        if !dispute.status.is_active() {
            return Err(AppError::BusinessRule(format!(
                "dispute {dispute_id} is already resolved"
            )));
        }
        let payment = self
            .repo
            .find_payment_by_order(dispute.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for order {}", dispute.order_id)))?;

        let (payment_transition, _) = resolution.transitions();
        payment_transition.check(payment.status)?;

        let changes = match resolution {
            DisputeResolution::ReturnToHold => PaymentChanges::default(),
            DisputeResolution::Refund => {
                self.gateway.refund(&payment.intent_id, payment.remaining()).await?;
                PaymentChanges {
                    refunded_amount: Some(payment.amount),
                    ..Default::default()
                }
            }
        };

        let resolved = self
            .repo
            .resolve_dispute(dispute_id, payment.id, resolution, changes, Utc::now())
            .await?;
        let Some((dispute, payment, order)) = resolved else {
            if let Some(settled) = self.resolved_elsewhere(dispute_id, resolution).await? {
                return Ok(settled);
            }
            return Err(match resolution {
                DisputeResolution::Refund => AppError::PartialFailure(format!(
                    "intent {} refunded but dispute {dispute_id} could not be resolved",
                    payment.intent_id
                )),
                DisputeResolution::ReturnToHold => AppError::BusinessRule(format!(
                    "dispute {dispute_id} changed state while being resolved"
                )),
            });
        };

        tracing::info!(%dispute_id, order_id = %order.id, resolution = resolution.as_str(), "Dispute resolved");
        record_activity(
            &self.repo,
            order.id,
            None,
            ActivityKind::DisputeResolved,
            format!("Dispute resolved: {}", resolution.as_str()),
        )
        .await;
        self.outbox.publish(&order, NotificationKind::DisputeResolved);
        Ok(ResolvedDispute {
            dispute,
            order,
            payment,
        })
    }

    /// A provider refund callback may resolve the dispute between the
    /// gateway call and the store write. That outcome counts as success.
    async fn resolved_elsewhere(
        &self,
        dispute_id: Uuid,
        resolution: DisputeResolution,
    ) -> Result<Option<ResolvedDispute>> {
        let Some(dispute) = self.repo.find_dispute(dispute_id).await? else {
            return Ok(None);
        };
        if dispute.status.is_active() || dispute.resolution.as_deref() != Some(resolution.as_str()) {
            return Ok(None);
        }
        let order = self.repo.find_order(dispute.order_id).await?;
        let payment = self.repo.find_payment_by_order(dispute.order_id).await?;
        Ok(order.zip(payment).map(|(order, payment)| {
            tracing::info!(%dispute_id, resolution = resolution.as_str(), "Dispute already resolved by a provider callback");
            ResolvedDispute {
                dispute,
                order,
                payment,
            }
        }))
    }
}
