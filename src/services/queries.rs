use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::domain::activity::OrderActivity;
use crate::domain::delivery::Delivery;
use crate::domain::dispute::Dispute;
use crate::domain::order::{Order, OrderItem};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    ActivityRepository, DeliveryRepository, DisputeRepository, OrderRepository, PaymentRepository,
    RepositoryRef,
};

/// Current state of an order as seen by one of its parties.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// The PIN is only visible to the buyer.
    pub delivery: Option<Delivery>,
    pub payment: Option<Payment>,
    pub active_dispute: Option<Dispute>,
}

/// Read side for reporting. Never mutates.
#[derive(Clone)]
pub struct OrderQueries {
    repo: RepositoryRef,
}

impl OrderQueries {
    pub fn new(repo: RepositoryRef) -> Self {
        Self { repo }
    }

    pub async fn view(&self, actor_id: Uuid, order_id: Uuid) -> Result<OrderView> {
        let order = self.visible_order(actor_id, order_id).await?;
        let items = self.repo.find_order_items(order_id).await?;
        let delivery = self.repo.find_delivery_by_order(order_id).await?;
        let delivery = if order.is_buyer(actor_id) {
            delivery
        } else {
            delivery.map(Delivery::redacted)
        };
        let payment = self.repo.find_payment_by_order(order_id).await?;
        let active_dispute = self.repo.find_active_dispute(order_id).await?;
        Ok(OrderView {
            order,
            items,
            delivery,
            payment,
            active_dispute,
        })
    }

    pub async fn activities(&self, actor_id: Uuid, order_id: Uuid) -> Result<Vec<OrderActivity>> {
        self.visible_order(actor_id, order_id).await?;
        Ok(self.repo.list_activities(order_id).await?)
    }

    async fn visible_order(&self, actor_id: Uuid, order_id: Uuid) -> Result<Order> {
        let order = self
            .repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        if !order.is_party(actor_id) {
            return Err(AppError::ForbiddenResource(
                "order belongs to other users".to_string(),
            ));
        }
        Ok(order)
    }
}
