#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use escrow_orderservice::{
    api::sandbox::SandboxGateway,
    app_error::{AppError, GatewayError, StoreError},
    config::EscrowConfig,
    domain::{
        activity::OrderActivity,
        delivery::{Delivery, DeliveryChanges, DeliveryTransition, PhotoUpload},
        dispute::{Dispute, DisputeResolution},
        money::Money,
        notification::{NotificationKind, OutboundNotification},
        order::{Order, OrderChanges, OrderItem, OrderTransition},
        payment::{Payment, PaymentChanges, PaymentTransition},
        ports::*,
        webhook::{WebhookCompletion, WebhookEvent},
    },
    infrastructure::InMemoryStore,
    services::{
        EscrowServices,
        orders::{CreateOrderReq, OrderAggregate, OrderItemReq},
        outbox::Outbox,
        webhooks::WebhookReceipt,
    },
};

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

pub struct Harness {
    pub store: InMemoryStore,
    pub faults: Faults,
    pub sandbox: Arc<SandboxGateway>,
    pub gateway: Arc<FlakyGateway>,
    pub services: EscrowServices,
    pub notifications: UnboundedReceiver<OutboundNotification>,
    pub buyer: Uuid,
    pub supplier: Uuid,
}

pub fn harness() -> Harness {
    let store = InMemoryStore::new();
    let faults = Faults::default();
    let sandbox = Arc::new(SandboxGateway::new(WEBHOOK_SECRET));
    let gateway = Arc::new(FlakyGateway::new(sandbox.clone()));
    let repo: RepositoryRef = Arc::new(FaultyStore {
        inner: store.clone(),
        faults: faults.clone(),
    });
    let (outbox, notifications) = Outbox::channel();
    let services = EscrowServices::new(repo, gateway.clone(), outbox, EscrowConfig::default());
    Harness {
        store,
        faults,
        sandbox,
        gateway,
        services,
        notifications,
        buyer: Uuid::new_v4(),
        supplier: Uuid::new_v4(),
    }
}

impl Harness {
    /// A single-item request: `quantity` units at `unit_price`, plus `fee`.
    pub fn order_request(&self, unit_price: Decimal, quantity: i64, fee: Decimal) -> CreateOrderReq {
        CreateOrderReq {
            supplier_id: self.supplier,
            items: vec![OrderItemReq {
                product_id: Uuid::new_v4(),
                product_name: "Ceramic floor tiles".into(),
                quantity,
                unit_price,
            }],
            delivery_date: Utc::now().date_naive() + Duration::days(2),
            window_starts_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_ends_at: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            recipient_name: "Kofi Boateng".into(),
            recipient_phone: "+233 20 555 0101".into(),
            address_line: "4 Liberation Road, Accra".into(),
            latitude: 5.6037,
            longitude: -0.187,
            vehicle_type: "pickup".into(),
            delivery_fee: fee,
        }
    }

    pub async fn create_order(&self, unit_price: Decimal, quantity: i64, fee: Decimal) -> OrderAggregate {
        self.services
            .orders
            .create(self.buyer, self.order_request(unit_price, quantity, fee))
            .await
            .expect("order creation")
    }

    /// Signs and delivers a provider event.
    pub async fn deliver(&self, body: &[u8]) -> Result<WebhookReceipt, AppError> {
        let signature = self.sandbox.sign(body);
        self.services.webhooks.receive(body, Some(&signature)).await
    }

    /// Provider confirms the capture of the hold.
    pub async fn capture(&self, aggregate: &OrderAggregate) -> Payment {
        let body = provider_event(
            &format!("evt_capture_{}", aggregate.payment.id.simple()),
            "payment.captured",
            &aggregate.payment.intent_id,
            Some("txn_capture"),
            None,
        );
        self.deliver(&body).await.expect("capture webhook");
        self.payment(aggregate.order.id).await
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        self.store.find_order(order_id).await.unwrap().expect("order exists")
    }

    pub async fn payment(&self, order_id: Uuid) -> Payment {
        self.store
            .find_payment_by_order(order_id)
            .await
            .unwrap()
            .expect("payment exists")
    }

    pub async fn delivery(&self, order_id: Uuid) -> Delivery {
        self.store
            .find_delivery_by_order(order_id)
            .await
            .unwrap()
            .expect("delivery exists")
    }

    pub fn drain_notifications(&mut self) -> Vec<NotificationKind> {
        let mut kinds = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            kinds.push(notification.kind);
        }
        kinds
    }
}

pub fn provider_event(
    id: &str,
    event_type: &str,
    intent_id: &str,
    transaction_id: Option<&str>,
    amount: Option<&str>,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "type": event_type,
        "data": {
            "intent_id": intent_id,
            "transaction_id": transaction_id,
            "amount": amount,
        }
    }))
    .unwrap()
}

pub fn jpeg() -> PhotoUpload {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    bytes.extend_from_slice(&[0x42; 256]);
    PhotoUpload {
        content_type: "image/jpeg".into(),
        bytes,
    }
}

pub fn money(value: Decimal) -> Money {
    Money::new(value).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStep {
    CreateIntent,
    Hold,
    Refund,
}

/// Sandbox provider that can be told to fail specific calls.
pub struct FlakyGateway {
    inner: Arc<SandboxGateway>,
    failing: Mutex<Vec<GatewayStep>>,
    pub intents: Mutex<Vec<String>>,
}

impl FlakyGateway {
    pub fn new(inner: Arc<SandboxGateway>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
            intents: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, step: GatewayStep) {
        self.failing.lock().unwrap().push(step);
    }

    pub fn last_intent(&self) -> Option<String> {
        self.intents.lock().unwrap().last().cloned()
    }

    fn check(&self, step: GatewayStep) -> Result<(), GatewayError> {
        if self.failing.lock().unwrap().contains(&step) {
            return Err(GatewayError::Unreachable(format!("{step:?} failed on purpose")));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FlakyGateway {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    async fn create_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<String, GatewayError> {
        self.check(GatewayStep::CreateIntent)?;
        let intent_id = self.inner.create_intent(amount, currency, metadata).await?;
        self.intents.lock().unwrap().push(intent_id.clone());
        Ok(intent_id)
    }

    async fn hold(&self, intent_id: &str) -> Result<(), GatewayError> {
        self.check(GatewayStep::Hold)?;
        self.inner.hold(intent_id).await
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<(), GatewayError> {
        self.check(GatewayStep::Refund)?;
        self.inner.refund(intent_id, amount).await
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.inner.validate_signature(payload, signature)
    }
}

/// Switches for [`FaultyStore`].
#[derive(Clone, Default)]
pub struct Faults {
    order_transition: Arc<Mutex<Option<OrderTransition>>>,
    insert_payment: Arc<AtomicBool>,
    delete_order: Arc<AtomicBool>,
    next_settlement: Arc<AtomicBool>,
    webhook_completion: Arc<AtomicBool>,
}

impl Faults {
    pub fn fail_order_transition(&self, transition: OrderTransition) {
        *self.order_transition.lock().unwrap() = Some(transition);
    }

    pub fn fail_insert_payment(&self) {
        self.insert_payment.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete_order(&self) {
        self.delete_order.store(true, Ordering::SeqCst);
    }

    /// Only the next webhook settlement fails, before anything is written.
    pub fn fail_next_settlement(&self) {
        self.next_settlement.store(true, Ordering::SeqCst);
    }

    pub fn fail_webhook_completion(&self) {
        self.webhook_completion.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        *self.order_transition.lock().unwrap() = None;
        self.insert_payment.store(false, Ordering::SeqCst);
        self.delete_order.store(false, Ordering::SeqCst);
        self.next_settlement.store(false, Ordering::SeqCst);
        self.webhook_completion.store(false, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Pool(format!("{what} failed on purpose"))
}

/// In-memory store with injectable write failures.
pub struct FaultyStore {
    inner: InMemoryStore,
    faults: Faults,
}

#[async_trait]
impl OrderRepository for FaultyStore {
    async fn insert_order(&self, order: Order) -> StoreResult<Order> {
        self.inner.insert_order(order).await
    }

    async fn insert_order_items(&self, items: Vec<OrderItem>) -> StoreResult<Vec<OrderItem>> {
        self.inner.insert_order_items(items).await
    }

    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        self.inner.find_order(order_id).await
    }

    async fn find_order_items(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        self.inner.find_order_items(order_id).await
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        transition: OrderTransition,
        changes: OrderChanges,
    ) -> StoreResult<Option<Order>> {
        if *self.faults.order_transition.lock().unwrap() == Some(transition) {
            return Err(injected("order transition"));
        }
        self.inner.transition_order(order_id, transition, changes).await
    }

    async fn annotate_order(&self, order_id: Uuid, changes: OrderChanges) -> StoreResult<Option<Order>> {
        self.inner.annotate_order(order_id, changes).await
    }

    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<u64> {
        self.inner.delete_order_items(order_id).await
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<u64> {
        if self.faults.delete_order.load(Ordering::SeqCst) {
            return Err(injected("order delete"));
        }
        self.inner.delete_order(order_id).await
    }
}

#[async_trait]
impl DeliveryRepository for FaultyStore {
    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery> {
        self.inner.insert_delivery(delivery).await
    }

    async fn find_delivery_by_order(&self, order_id: Uuid) -> StoreResult<Option<Delivery>> {
        self.inner.find_delivery_by_order(order_id).await
    }

    async fn transition_delivery(
        &self,
        delivery_id: Uuid,
        transition: DeliveryTransition,
        changes: DeliveryChanges,
    ) -> StoreResult<Option<Delivery>> {
        self.inner.transition_delivery(delivery_id, transition, changes).await
    }

    async fn delete_delivery(&self, delivery_id: Uuid) -> StoreResult<u64> {
        self.inner.delete_delivery(delivery_id).await
    }
}

#[async_trait]
impl PaymentRepository for FaultyStore {
    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment> {
        if self.faults.insert_payment.load(Ordering::SeqCst) {
            return Err(injected("payment insert"));
        }
        self.inner.insert_payment(payment).await
    }

    async fn find_payment_by_order(&self, order_id: Uuid) -> StoreResult<Option<Payment>> {
        self.inner.find_payment_by_order(order_id).await
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        self.inner.find_payment_by_intent(intent_id).await
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
        changes: PaymentChanges,
    ) -> StoreResult<Option<Payment>> {
        self.inner.transition_payment(payment_id, transition, changes).await
    }

    async fn annotate_payment(&self, payment_id: Uuid, changes: PaymentChanges) -> StoreResult<Option<Payment>> {
        self.inner.annotate_payment(payment_id, changes).await
    }

    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<u64> {
        self.inner.delete_payment(payment_id).await
    }

    async fn release_escrow(
        &self,
        payment_id: Uuid,
        order_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Payment, Order)>> {
        self.inner.release_escrow(payment_id, order_id, released_at).await
    }
}

#[async_trait]
impl DisputeRepository for FaultyStore {
    async fn open_dispute(&self, dispute: Dispute, payment_id: Uuid) -> StoreResult<DisputeOpening> {
        self.inner.open_dispute(dispute, payment_id).await
    }

    async fn find_dispute(&self, dispute_id: Uuid) -> StoreResult<Option<Dispute>> {
        self.inner.find_dispute(dispute_id).await
    }

    async fn find_active_dispute(&self, order_id: Uuid) -> StoreResult<Option<Dispute>> {
        self.inner.find_active_dispute(order_id).await
    }

    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        payment_id: Uuid,
        resolution: DisputeResolution,
        payment_changes: PaymentChanges,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Payment, Order)>> {
        self.inner
            .resolve_dispute(dispute_id, payment_id, resolution, payment_changes, resolved_at)
            .await
    }
}

#[async_trait]
impl WebhookEventRepository for FaultyStore {
    async fn record_webhook_event(&self, event: WebhookEvent) -> StoreResult<WebhookRecording> {
        self.inner.record_webhook_event(event).await
    }

    async fn reclaim_webhook_event(
        &self,
        event_id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>> {
        self.inner.reclaim_webhook_event(event_id, stale_before, now).await
    }

    async fn complete_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        completion: WebhookCompletion,
    ) -> StoreResult<bool> {
        if self.faults.webhook_completion.load(Ordering::SeqCst) {
            return Err(injected("webhook completion"));
        }
        self.inner.complete_webhook_event(event_id, claimed_at, completion).await
    }

    async fn settle_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        effect: WebhookEffect,
        completion: WebhookCompletion,
    ) -> StoreResult<WebhookSettlement> {
        if self.faults.next_settlement.swap(false, Ordering::SeqCst) {
            return Err(injected("webhook settlement"));
        }
        self.inner
            .settle_webhook_event(event_id, claimed_at, effect, completion)
            .await
    }

    async fn find_webhook_event(&self, provider_event_id: &str) -> StoreResult<Option<WebhookEvent>> {
        self.inner.find_webhook_event(provider_event_id).await
    }

    async fn recent_webhook_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>> {
        self.inner.recent_webhook_events(limit).await
    }
}

#[async_trait]
impl ActivityRepository for FaultyStore {
    async fn append_activity(&self, activity: OrderActivity) -> StoreResult<()> {
        self.inner.append_activity(activity).await
    }

    async fn list_activities(&self, order_id: Uuid) -> StoreResult<Vec<OrderActivity>> {
        self.inner.list_activities(order_id).await
    }
}
