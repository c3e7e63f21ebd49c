use crate::app_error::StoreError;
use crate::domain::activity::OrderActivity;
use crate::domain::delivery::{Delivery, DeliveryChanges, DeliveryTransition};
use crate::domain::dispute::{Dispute, DisputeResolution, DisputeStatus};
use crate::domain::order::{Order, OrderChanges, OrderItem, OrderTransition};
use crate::domain::payment::{Payment, PaymentChanges, PaymentTransition};
use crate::domain::ports::{
    ActivityRepository, DeliveryRepository, DisputeOpening, DisputeRepository, OrderFollowUp,
    OrderRepository, PaymentRepository, StoreResult, WebhookEffect, WebhookEventRepository,
    WebhookRecording, WebhookSettlement,
};
use crate::domain::webhook::{WebhookCompletion, WebhookEvent, WebhookStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, Vec<OrderItem>>,
    deliveries: HashMap<Uuid, Delivery>,
    payments: HashMap<Uuid, Payment>,
    disputes: HashMap<Uuid, Dispute>,
    webhook_events: HashMap<Uuid, WebhookEvent>,
    activities: Vec<OrderActivity>,
}

/// A thread-safe in-memory implementation of every repository port.
///
/// All tables sit behind a single `RwLock`, so the compound operations
/// (escrow release, dispute opening and resolution) are applied atomically
/// just like their Postgres transactions. Used by the test suite and by
/// `STORAGE_BACKEND=memory`.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows referencing `order_id` across order, item, delivery
    /// and payment tables.
    pub async fn rows_for_order(&self, order_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        usize::from(tables.orders.contains_key(&order_id))
            + tables.order_items.get(&order_id).map_or(0, Vec::len)
            + tables
                .deliveries
                .values()
                .filter(|d| d.order_id == order_id)
                .count()
            + tables
                .payments
                .values()
                .filter(|p| p.order_id == order_id)
                .count()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn webhook_events(&self) -> Vec<WebhookEvent> {
        let tables = self.tables.read().await;
        let mut events: Vec<_> = tables.webhook_events.values().cloned().collect();
        events.sort_by_key(|e| e.received_at);
        events
    }

    /// Every dispute ever opened on `order_id`, resolved ones included.
    pub async fn disputes_for_order(&self, order_id: Uuid) -> Vec<Dispute> {
        let tables = self.tables.read().await;
        tables
            .disputes
            .values()
            .filter(|d| d.order_id == order_id)
            .cloned()
            .collect()
    }
}

impl Tables {
    fn claimed_event(&mut self, event_id: Uuid, claimed_at: DateTime<Utc>) -> Option<&mut WebhookEvent> {
        self.webhook_events
            .get_mut(&event_id)
            .filter(|e| e.status == WebhookStatus::Processing && e.claimed_at == claimed_at)
    }

    fn active_dispute(&self, order_id: Uuid) -> Option<&Dispute> {
        self.disputes
            .values()
            .find(|d| d.order_id == order_id && d.status.is_active())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: Order) -> StoreResult<Order> {
        let mut tables = self.tables.write().await;
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn insert_order_items(&self, items: Vec<OrderItem>) -> StoreResult<Vec<OrderItem>> {
        let mut tables = self.tables.write().await;
        for item in &items {
            tables
                .order_items
                .entry(item.order_id)
                .or_default()
                .push(item.clone());
        }
        Ok(items)
    }

    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn find_order_items(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let tables = self.tables.read().await;
        Ok(tables.order_items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        transition: OrderTransition,
        changes: OrderChanges,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .orders
            .get_mut(&order_id)
            .filter(|order| transition.allows(order.status))
            .map(|order| {
                order.apply(Some(transition), &changes, Utc::now());
                order.clone()
            }))
    }

    async fn annotate_order(&self, order_id: Uuid, changes: OrderChanges) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables.orders.get_mut(&order_id).map(|order| {
            order.apply(None, &changes, Utc::now());
            order.clone()
        }))
    }

    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .order_items
            .remove(&order_id)
            .map_or(0, |items| items.len() as u64))
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        tables.activities.retain(|a| a.order_id != order_id);
        Ok(u64::from(tables.orders.remove(&order_id).is_some()))
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery> {
        let mut tables = self.tables.write().await;
        tables.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn find_delivery_by_order(&self, order_id: Uuid) -> StoreResult<Option<Delivery>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .values()
            .find(|d| d.order_id == order_id)
            .cloned())
    }

    async fn transition_delivery(
        &self,
        delivery_id: Uuid,
        transition: DeliveryTransition,
        changes: DeliveryChanges,
    ) -> StoreResult<Option<Delivery>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .deliveries
            .get_mut(&delivery_id)
            .filter(|d| d.stage == transition.source())
            .map(|d| {
                d.apply(transition, &changes, Utc::now());
                d.clone()
            }))
    }

    async fn delete_delivery(&self, delivery_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(u64::from(tables.deliveries.remove(&delivery_id).is_some()))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment> {
        let mut tables = self.tables.write().await;
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_order(&self, order_id: Uuid) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.intent_id == intent_id)
            .cloned())
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
        changes: PaymentChanges,
    ) -> StoreResult<Option<Payment>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .payments
            .get_mut(&payment_id)
            .filter(|p| transition.allows(p.status))
            .map(|p| {
                p.apply(transition, &changes, Utc::now());
                p.clone()
            }))
    }

    async fn annotate_payment(&self, payment_id: Uuid, changes: PaymentChanges) -> StoreResult<Option<Payment>> {
        let mut tables = self.tables.write().await;
        Ok(tables.payments.get_mut(&payment_id).map(|p| {
            if let Some(transaction_id) = &changes.transaction_id {
                p.transaction_id = Some(transaction_id.clone());
            }
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(u64::from(tables.payments.remove(&payment_id).is_some()))
    }

    async fn release_escrow(
        &self,
        payment_id: Uuid,
        order_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Payment, Order)>> {
        let mut tables = self.tables.write().await;
        let payment_ready = tables
            .payments
            .get(&payment_id)
            .is_some_and(|p| PaymentTransition::Release.allows(p.status));
        let order_ready = tables
            .orders
            .get(&order_id)
            .is_some_and(|o| OrderTransition::Complete.allows(o.status));
        if !payment_ready || !order_ready {
            return Ok(None);
        }

        let changes = PaymentChanges {
            released_at: Some(released_at),
            ..Default::default()
        };
        let payment = tables.payments.get_mut(&payment_id).map(|p| {
            p.apply(PaymentTransition::Release, &changes, released_at);
            p.clone()
        });
        let order = tables.orders.get_mut(&order_id).map(|o| {
            o.apply(
                Some(OrderTransition::Complete),
                &OrderChanges::default(),
                released_at,
            );
            o.clone()
        });
        Ok(payment.zip(order))
    }
}

#[async_trait]
impl DisputeRepository for InMemoryStore {
    async fn open_dispute(&self, dispute: Dispute, payment_id: Uuid) -> StoreResult<DisputeOpening> {
        let mut tables = self.tables.write().await;
        if let Some(active) = tables.active_dispute(dispute.order_id) {
            return Ok(DisputeOpening::ActiveDisputeExists(active.clone()));
        }

        let Some(order_status) = tables.orders.get(&dispute.order_id).map(|o| o.status) else {
            return Err(StoreError::Corrupt(format!(
                "order {} vanished while opening a dispute",
                dispute.order_id
            )));
        };
        if !OrderTransition::OpenDispute.allows(order_status) {
            return Ok(DisputeOpening::OrderNotDisputable(order_status));
        }

        let Some(payment_status) = tables.payments.get(&payment_id).map(|p| p.status) else {
            return Err(StoreError::Corrupt(format!(
                "payment {payment_id} vanished while opening a dispute"
            )));
        };
        if !PaymentTransition::Freeze.allows(payment_status) {
            return Ok(DisputeOpening::PaymentNotHeld(payment_status));
        }

        let now = dispute.created_at;
        tables.disputes.insert(dispute.id, dispute.clone());
        let payment = tables.payments.get_mut(&payment_id).map(|p| {
            p.apply(PaymentTransition::Freeze, &PaymentChanges::default(), now);
            p.clone()
        });
        let order = tables.orders.get_mut(&dispute.order_id).map(|o| {
            o.apply(
                Some(OrderTransition::OpenDispute),
                &OrderChanges::default(),
                now,
            );
            o.clone()
        });

        match (payment, order) {
            (Some(payment), Some(order)) => Ok(DisputeOpening::Opened {
                dispute,
                payment,
                order,
            }),
            _ => Err(StoreError::Corrupt(format!(
                "order {} lost its rows while opening a dispute",
                dispute.order_id
            ))),
        }
    }

    async fn find_dispute(&self, dispute_id: Uuid) -> StoreResult<Option<Dispute>> {
        let tables = self.tables.read().await;
        Ok(tables.disputes.get(&dispute_id).cloned())
    }

    async fn find_active_dispute(&self, order_id: Uuid) -> StoreResult<Option<Dispute>> {
        let tables = self.tables.read().await;
        Ok(tables.active_dispute(order_id).cloned())
    }

    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        payment_id: Uuid,
        resolution: DisputeResolution,
        payment_changes: PaymentChanges,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Payment, Order)>> {
        let (payment_transition, order_transition) = resolution.transitions();
        let mut tables = self.tables.write().await;

        let Some(dispute) = tables
            .disputes
            .get(&dispute_id)
            .filter(|d| d.status.is_active())
            .cloned()
        else {
            return Ok(None);
        };
        let payment_ready = tables
            .payments
            .get(&payment_id)
            .is_some_and(|p| p.order_id == dispute.order_id && payment_transition.allows(p.status));
        let order_ready = tables
            .orders
            .get(&dispute.order_id)
            .is_some_and(|o| order_transition.allows(o.status));
        if !payment_ready || !order_ready {
            return Ok(None);
        }

        let order_id = dispute.order_id;
        let dispute = tables.disputes.get_mut(&dispute_id).map(|d| {
            d.status = DisputeStatus::Resolved;
            d.resolution = Some(resolution.as_str().to_string());
            d.resolved_at = Some(resolved_at);
            d.updated_at = resolved_at;
            d.clone()
        });
        let payment = tables.payments.get_mut(&payment_id).map(|p| {
            p.apply(payment_transition, &payment_changes, resolved_at);
            p.clone()
        });
        let order = tables.orders.get_mut(&order_id).map(|o| {
            o.apply(Some(order_transition), &OrderChanges::default(), resolved_at);
            o.clone()
        });

        Ok(match (dispute, payment, order) {
            (Some(d), Some(p), Some(o)) => Some((d, p, o)),
            _ => None,
        })
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryStore {
    async fn record_webhook_event(&self, event: WebhookEvent) -> StoreResult<WebhookRecording> {
        let mut tables = self.tables.write().await;
        if let Some(provider_id) = &event.provider_event_id
            && let Some(existing) = tables
                .webhook_events
                .values()
                .find(|e| e.provider_event_id.as_ref() == Some(provider_id))
        {
            return Ok(WebhookRecording::Duplicate(existing.clone()));
        }
        tables.webhook_events.insert(event.id, event.clone());
        Ok(WebhookRecording::Inserted(event))
    }

    async fn reclaim_webhook_event(
        &self,
        event_id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .webhook_events
            .get_mut(&event_id)
            .filter(|e| match e.status {
                WebhookStatus::Failed => true,
                WebhookStatus::Processing => e.claimed_at < stale_before,
                WebhookStatus::Processed => false,
            })
            .map(|e| {
                e.status = WebhookStatus::Processing;
                e.claimed_at = now;
                e.error = None;
                e.clone()
            }))
    }

    async fn complete_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        completion: WebhookCompletion,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(e) = tables.claimed_event(event_id, claimed_at) else {
            return Ok(false);
        };
        e.complete(completion);
        Ok(true)
    }

    async fn settle_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        effect: WebhookEffect,
        completion: WebhookCompletion,
    ) -> StoreResult<WebhookSettlement> {
        let mut tables = self.tables.write().await;
        if tables.claimed_event(event_id, claimed_at).is_none() {
            return Ok(WebhookSettlement::ClaimLost);
        }
        let Some(current) = tables.payments.get(&effect.payment_id).map(|p| p.status) else {
            return Err(StoreError::Corrupt(format!("payment {} is missing", effect.payment_id)));
        };
        if !effect.transition.allows(current) {
            return Ok(WebhookSettlement::PaymentMoved(current));
        }

        let now = completion.processed_at;
        let payment = tables
            .payments
            .get_mut(&effect.payment_id)
            .map(|p| {
                p.apply(effect.transition, &effect.changes, now);
                p.clone()
            })
            .ok_or_else(|| StoreError::Corrupt(format!("payment {} is missing", effect.payment_id)))?;
        let order = tables
            .orders
            .get_mut(&payment.order_id)
            .map(|o| {
                match &effect.order {
                    Some(OrderFollowUp::Transition(transition, changes)) if transition.allows(o.status) => {
                        o.apply(Some(*transition), changes, now)
                    }
                    Some(OrderFollowUp::TransitionOrAnnotate(transition, changes)) => {
                        let transition = Some(*transition).filter(|t| t.allows(o.status));
                        o.apply(transition, changes, now)
                    }
                    _ => {}
                }
                o.clone()
            })
            .ok_or_else(|| StoreError::Corrupt(format!("order {} is missing", payment.order_id)))?;

        if let Some(e) = tables.claimed_event(event_id, claimed_at) {
            e.complete(WebhookCompletion {
                payment_id: Some(payment.id),
                transaction_id: payment.transaction_id.clone(),
                ..completion
            });
        }
        Ok(WebhookSettlement::Applied { payment, order })
    }

    async fn find_webhook_event(&self, provider_event_id: &str) -> StoreResult<Option<WebhookEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .webhook_events
            .values()
            .find(|e| e.provider_event_id.as_deref() == Some(provider_event_id))
            .cloned())
    }

    async fn recent_webhook_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>> {
        let mut events = self.webhook_events().await;
        events.reverse();
        events.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(events)
    }
}

#[async_trait]
impl ActivityRepository for InMemoryStore {
    async fn append_activity(&self, activity: OrderActivity) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.activities.push(activity);
        Ok(())
    }

    async fn list_activities(&self, order_id: Uuid) -> StoreResult<Vec<OrderActivity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .activities
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::order::{DeliveryAddress, DeliveryWindow, OrderStatus};
    use crate::domain::payment::PaymentStatus;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        let total = Money::new(dec!(45.00)).unwrap();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20261019-ABCDEF".into(),
            buyer_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            status,
            subtotal: total,
            delivery_fee: Money::ZERO,
            total,
            currency: "USD".into(),
            delivery_window: DeliveryWindow {
                date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                starts_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                ends_at: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            },
            delivery_address: DeliveryAddress {
                line: "1 Dock Road".into(),
                latitude: 51.5,
                longitude: -0.1,
            },
            vehicle_type: "van".into(),
            cancellation_reason: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_conditional_transition_only_matches_source_state() {
        let store = InMemoryStore::new();
        let order = store.insert_order(order(OrderStatus::Pending)).await.unwrap();

        let updated = store
            .transition_order(order.id, OrderTransition::Complete, OrderChanges::default())
            .await
            .unwrap();
        assert!(updated.is_none());

        let updated = store
            .transition_order(order.id, OrderTransition::Confirm, OrderChanges::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_release_escrow_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let order = store
            .insert_order(order(OrderStatus::AwaitingBuyerConfirmation))
            .await
            .unwrap();
        let mut payment = Payment::new(order.id, "sandbox", "pi_1", order.total, "USD", Utc::now());
        payment.status = PaymentStatus::Held;
        let payment = store.insert_payment(payment).await.unwrap();

        // Order not yet delivered: nothing moves.
        let released = store
            .release_escrow(payment.id, order.id, Utc::now())
            .await
            .unwrap();
        assert!(released.is_none());
        let untouched = store.find_payment_by_order(order.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, PaymentStatus::Held);

        store
            .transition_order(order.id, OrderTransition::MarkDelivered, OrderChanges::default())
            .await
            .unwrap();
        let (payment, order) = store
            .release_escrow(payment.id, order.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Released);
        assert!(payment.released_at.is_some());
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_webhook_dedupe_by_provider_id() {
        let store = InMemoryStore::new();
        let first = WebhookEvent::received(
            Some("evt_1".into()),
            Some("payment.captured".into()),
            "{}".into(),
            true,
            WebhookStatus::Processing,
            Utc::now(),
        );
        let second = WebhookEvent::received(
            Some("evt_1".into()),
            Some("payment.captured".into()),
            "{}".into(),
            true,
            WebhookStatus::Processing,
            Utc::now(),
        );
        assert!(matches!(
            store.record_webhook_event(first).await.unwrap(),
            WebhookRecording::Inserted(_)
        ));
        assert!(matches!(
            store.record_webhook_event(second).await.unwrap(),
            WebhookRecording::Duplicate(_)
        ));

        // Unauthenticated rows never collide.
        for _ in 0..2 {
            let anonymous = WebhookEvent::received(
                None,
                None,
                "garbage".into(),
                false,
                WebhookStatus::Failed,
                Utc::now(),
            );
            assert!(matches!(
                store.record_webhook_event(anonymous).await.unwrap(),
                WebhookRecording::Inserted(_)
            ));
        }
        assert_eq!(store.webhook_events().await.len(), 3);
    }

    #[tokio::test]
    async fn test_settlement_requires_the_current_claim() {
        let store = InMemoryStore::new();
        let order = store.insert_order(order(OrderStatus::Confirmed)).await.unwrap();
        let mut payment = Payment::new(order.id, "sandbox", "pi_1", order.total, "USD", Utc::now());
        payment.status = PaymentStatus::Held;
        let payment = store.insert_payment(payment).await.unwrap();

        let abandoned = WebhookEvent::received(
            Some("evt_refund".into()),
            Some("payment.refunded".into()),
            "{}".into(),
            true,
            WebhookStatus::Processing,
            Utc::now() - chrono::Duration::minutes(30),
        );
        let WebhookRecording::Inserted(abandoned) = store.record_webhook_event(abandoned).await.unwrap() else {
            panic!("expected a new audit row");
        };
        let now = Utc::now();
        let taken = store
            .reclaim_webhook_event(abandoned.id, now - chrono::Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();

        let effect = WebhookEffect {
            payment_id: payment.id,
            transition: PaymentTransition::PartialRefund,
            changes: PaymentChanges {
                refunded_amount: Money::new(dec!(10.00)).ok(),
                ..Default::default()
            },
            order: None,
        };
        let completion = || WebhookCompletion {
            status: WebhookStatus::Processed,
            error: None,
            payment_id: None,
            transaction_id: None,
            processed_at: Utc::now(),
            processing_ms: 3,
        };

        let stale = store
            .settle_webhook_event(abandoned.id, abandoned.claimed_at, effect.clone(), completion())
            .await
            .unwrap();
        assert!(matches!(stale, WebhookSettlement::ClaimLost));
        let untouched = store.find_payment_by_order(order.id).await.unwrap().unwrap();
        assert!(untouched.refunded_amount.is_zero());
        assert_eq!(untouched.status, PaymentStatus::Held);

        let WebhookSettlement::Applied { payment, order } = store
            .settle_webhook_event(abandoned.id, taken.claimed_at, effect.clone(), completion())
            .await
            .unwrap()
        else {
            panic!("expected the refund to apply");
        };
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(payment.refunded_amount, Money::new(dec!(10.00)).unwrap());
        assert_eq!(order.status, OrderStatus::Confirmed);
        let row = store.find_webhook_event("evt_refund").await.unwrap().unwrap();
        assert_eq!(row.status, WebhookStatus::Processed);
        assert_eq!(row.payment_id, Some(payment.id));

        // A closed row cannot be settled or completed again.
        let again = store
            .settle_webhook_event(abandoned.id, taken.claimed_at, effect, completion())
            .await
            .unwrap();
        assert!(matches!(again, WebhookSettlement::ClaimLost));
        assert!(!store
            .complete_webhook_event(abandoned.id, taken.claimed_at, completion())
            .await
            .unwrap());
        assert_eq!(
            store.find_payment_by_order(order.id).await.unwrap().unwrap().refunded_amount,
            Money::new(dec!(10.00)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_settlement_leaves_moved_payment_alone() {
        let store = InMemoryStore::new();
        let order = store.insert_order(order(OrderStatus::Cancelled)).await.unwrap();
        let mut payment = Payment::new(order.id, "sandbox", "pi_2", order.total, "USD", Utc::now());
        payment.status = PaymentStatus::Refunded;
        let payment = store.insert_payment(payment).await.unwrap();
        let WebhookRecording::Inserted(event) = store
            .record_webhook_event(WebhookEvent::received(
                Some("evt_capture".into()),
                Some("payment.captured".into()),
                "{}".into(),
                true,
                WebhookStatus::Processing,
                Utc::now(),
            ))
            .await
            .unwrap()
        else {
            panic!("expected a new audit row");
        };

        let settlement = store
            .settle_webhook_event(
                event.id,
                event.claimed_at,
                WebhookEffect {
                    payment_id: payment.id,
                    transition: PaymentTransition::Capture,
                    changes: PaymentChanges::default(),
                    order: Some(OrderFollowUp::TransitionOrAnnotate(
                        OrderTransition::Confirm,
                        OrderChanges::default(),
                    )),
                },
                WebhookCompletion {
                    status: WebhookStatus::Processed,
                    error: None,
                    payment_id: None,
                    transaction_id: None,
                    processed_at: Utc::now(),
                    processing_ms: 1,
                },
            )
            .await
            .unwrap();
        assert!(matches!(settlement, WebhookSettlement::PaymentMoved(PaymentStatus::Refunded)));
        let row = store.find_webhook_event("evt_capture").await.unwrap().unwrap();
        assert_eq!(row.status, WebhookStatus::Processing);
        assert_eq!(store.find_order(order.id).await.unwrap().unwrap().status, OrderStatus::Cancelled);
    }
}
