use super::activity::OrderActivity;
use super::delivery::{Delivery, DeliveryChanges, DeliveryTransition};
use super::dispute::{Dispute, DisputeResolution};
use super::money::Money;
use super::notification::OutboundNotification;
use super::order::{Order, OrderChanges, OrderItem, OrderStatus, OrderTransition};
use super::payment::{Payment, PaymentChanges, PaymentStatus, PaymentTransition};
use super::webhook::{WebhookCompletion, WebhookEvent};
use crate::app_error::{GatewayError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Transition methods return `None` when the row was not in one of the
/// transition's source states, i.e. the conditional update matched nothing.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: Order) -> StoreResult<Order>;
    async fn insert_order_items(&self, items: Vec<OrderItem>) -> StoreResult<Vec<OrderItem>>;
    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>>;
    async fn find_order_items(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>>;
    async fn transition_order(
        &self,
        order_id: Uuid,
        transition: OrderTransition,
        changes: OrderChanges,
    ) -> StoreResult<Option<Order>>;
    /// Writes the changes without touching the status.
    async fn annotate_order(&self, order_id: Uuid, changes: OrderChanges) -> StoreResult<Option<Order>>;
    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<u64>;
    async fn delete_order(&self, order_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery>;
    async fn find_delivery_by_order(&self, order_id: Uuid) -> StoreResult<Option<Delivery>>;
    async fn transition_delivery(
        &self,
        delivery_id: Uuid,
        transition: DeliveryTransition,
        changes: DeliveryChanges,
    ) -> StoreResult<Option<Delivery>>;
    async fn delete_delivery(&self, delivery_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment>;
    async fn find_payment_by_order(&self, order_id: Uuid) -> StoreResult<Option<Payment>>;
    async fn find_payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>>;
    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
        changes: PaymentChanges,
    ) -> StoreResult<Option<Payment>>;
    async fn annotate_payment(&self, payment_id: Uuid, changes: PaymentChanges) -> StoreResult<Option<Payment>>;
    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<u64>;

    /// `held → released` and `delivered → completed`, both or neither.
    async fn release_escrow(
        &self,
        payment_id: Uuid,
        order_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Payment, Order)>>;
}

#[derive(Debug, Clone)]
pub enum DisputeOpening {
    Opened {
        dispute: Dispute,
        payment: Payment,
        order: Order,
    },
    ActiveDisputeExists(Dispute),
    OrderNotDisputable(OrderStatus),
    PaymentNotHeld(PaymentStatus),
}

#[async_trait]
pub trait DisputeRepository: Send + Sync {
    /// Inserts the dispute, freezes the payment and moves the order to
    /// `disputed` as one unit.
    async fn open_dispute(&self, dispute: Dispute, payment_id: Uuid) -> StoreResult<DisputeOpening>;
    async fn find_dispute(&self, dispute_id: Uuid) -> StoreResult<Option<Dispute>>;
    async fn find_active_dispute(&self, order_id: Uuid) -> StoreResult<Option<Dispute>>;
    /// Marks the dispute resolved and applies the matching payment and order
    /// transitions as one unit.
    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        payment_id: Uuid,
        resolution: DisputeResolution,
        payment_changes: PaymentChanges,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Payment, Order)>>;
}

#[derive(Debug, Clone)]
pub enum WebhookRecording {
    Inserted(WebhookEvent),
    /// An event with the same provider id already exists.
    Duplicate(WebhookEvent),
}

/// What a settled event does to the order once the payment has moved.
#[derive(Debug, Clone)]
pub enum OrderFollowUp {
    /// Leaves the order as is when it is not in a source state.
    Transition(OrderTransition, OrderChanges),
    /// Writes the changes without a status change when the transition does
    /// not apply.
    TransitionOrAnnotate(OrderTransition, OrderChanges),
}

/// Ledger movement requested by a provider event.
#[derive(Debug, Clone)]
pub struct WebhookEffect {
    pub payment_id: Uuid,
    pub transition: PaymentTransition,
    pub changes: PaymentChanges,
    pub order: Option<OrderFollowUp>,
}

#[derive(Debug, Clone)]
pub enum WebhookSettlement {
    Applied { payment: Payment, order: Order },
    /// The payment was not in a source state of the transition. Nothing was
    /// written.
    PaymentMoved(PaymentStatus),
    /// The event is no longer `processing` under the caller's claim. Nothing
    /// was written.
    ClaimLost,
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn record_webhook_event(&self, event: WebhookEvent) -> StoreResult<WebhookRecording>;
    /// Takes ownership of a failed event, or of a processing event whose
    /// claim is older than `stale_before`.
    async fn reclaim_webhook_event(
        &self,
        event_id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>>;
    /// Finishes an event that is still `processing` under `claimed_at`.
    /// Returns `false` when the claim was lost and nothing was written.
    async fn complete_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        completion: WebhookCompletion,
    ) -> StoreResult<bool>;
    /// Applies the payment transition, its order follow-up and the
    /// completion of the event as one unit. The event must still be
    /// `processing` under `claimed_at`.
    async fn settle_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        effect: WebhookEffect,
        completion: WebhookCompletion,
    ) -> StoreResult<WebhookSettlement>;
    async fn find_webhook_event(&self, provider_event_id: &str) -> StoreResult<Option<WebhookEvent>>;
    async fn recent_webhook_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn append_activity(&self, activity: OrderActivity) -> StoreResult<()>;
    async fn list_activities(&self, order_id: Uuid) -> StoreResult<Vec<OrderActivity>>;
}

/// Everything the engine persists.
pub trait Repository:
    OrderRepository
    + DeliveryRepository
    + PaymentRepository
    + DisputeRepository
    + WebhookEventRepository
    + ActivityRepository
{
}

impl<T> Repository for T where
    T: OrderRepository
        + DeliveryRepository
        + PaymentRepository
        + DisputeRepository
        + WebhookEventRepository
        + ActivityRepository
{
}

pub type RepositoryRef = Arc<dyn Repository>;

pub type IntentMetadata = BTreeMap<String, String>;

/// Contract of any payment provider the engine can sit on top of.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn create_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<String, GatewayError>;

    async fn hold(&self, intent_id: &str) -> Result<(), GatewayError>;

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<(), GatewayError>;

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool;
}

pub type GatewayRef = Arc<dyn PaymentGateway>;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &OutboundNotification) -> anyhow::Result<()>;
}
