use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::app_error::StoreError;
use crate::domain::{
    activity::OrderActivity,
    delivery::{Delivery, DeliveryChanges, DeliveryTransition, PhotoEvidence, Recipient, Verification, VerificationMethod},
    dispute::Dispute,
    money::Money,
    order::{DeliveryAddress, DeliveryWindow, Order, OrderChanges, OrderItem},
    payment::{Payment, PaymentChanges},
    webhook::WebhookEvent,
};

// Orders

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub supplier_id: Uuid,
    pub status: String,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub delivery_date: NaiveDate,
    pub delivery_starts_at: NaiveTime,
    pub delivery_ends_at: NaiveTime,
    pub delivery_address: String,
    pub delivery_latitude: f64,
    pub delivery_longitude: f64,
    pub vehicle_type: String,
    pub cancellation_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderEntity {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            buyer_id: order.buyer_id,
            supplier_id: order.supplier_id,
            status: order.status.to_string(),
            subtotal: order.subtotal.value(),
            delivery_fee: order.delivery_fee.value(),
            total: order.total.value(),
            currency: order.currency.clone(),
            delivery_date: order.delivery_window.date,
            delivery_starts_at: order.delivery_window.starts_at,
            delivery_ends_at: order.delivery_window.ends_at,
            delivery_address: order.delivery_address.line.clone(),
            delivery_latitude: order.delivery_address.latitude,
            delivery_longitude: order.delivery_address.longitude,
            vehicle_type: order.vehicle_type.clone(),
            cancellation_reason: order.cancellation_reason.clone(),
            paid_at: order.paid_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl TryFrom<OrderEntity> for Order {
    type Error = StoreError;

    fn try_from(entity: OrderEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            order_number: entity.order_number,
            buyer_id: entity.buyer_id,
            supplier_id: entity.supplier_id,
            status: entity.status.parse()?,
            subtotal: Money::from_decimal_unchecked(entity.subtotal),
            delivery_fee: Money::from_decimal_unchecked(entity.delivery_fee),
            total: Money::from_decimal_unchecked(entity.total),
            currency: entity.currency,
            delivery_window: DeliveryWindow {
                date: entity.delivery_date,
                starts_at: entity.delivery_starts_at,
                ends_at: entity.delivery_ends_at,
            },
            delivery_address: DeliveryAddress {
                line: entity.delivery_address,
                latitude: entity.delivery_latitude,
                longitude: entity.delivery_longitude,
            },
            vehicle_type: entity.vehicle_type,
            cancellation_reason: entity.cancellation_reason,
            paid_at: entity.paid_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

/// `None` fields are left untouched by diesel.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderChangeset {
    pub status: Option<String>,
    pub cancellation_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderChangeset {
    pub fn new(status: Option<String>, changes: OrderChanges, now: DateTime<Utc>) -> Self {
        Self {
            status,
            cancellation_reason: changes.cancellation_reason,
            paid_at: changes.paid_at,
            updated_at: Some(now),
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(belongs_to(OrderEntity, foreign_key = order_id))]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&OrderItem> for OrderItemEntity {
    type Error = StoreError;

    fn try_from(item: &OrderItem) -> Result<Self, Self::Error> {
        Ok(Self {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            quantity: i32::try_from(item.quantity)
                .map_err(|_| StoreError::Corrupt(format!("quantity {} out of range", item.quantity)))?,
            unit_price: item.unit_price.value(),
            line_total: item.line_total.value(),
            created_at: item.created_at,
        })
    }
}

impl TryFrom<OrderItemEntity> for OrderItem {
    type Error = StoreError;

    fn try_from(entity: OrderItemEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            order_id: entity.order_id,
            product_id: entity.product_id,
            product_name: entity.product_name,
            quantity: u32::try_from(entity.quantity)
                .map_err(|_| StoreError::Corrupt(format!("negative quantity on item {}", entity.id)))?,
            unit_price: Money::from_decimal_unchecked(entity.unit_price),
            line_total: Money::from_decimal_unchecked(entity.line_total),
            created_at: entity.created_at,
        })
    }
}

// Deliveries

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage: String,
    pub delivery_date: NaiveDate,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub verification_method: String,
    pub pin_code: Option<String>,
    pub pin_verified: bool,
    pub photo_content_type: Option<String>,
    pub photo_sha256: Option<String>,
    pub photo_size_bytes: Option<i64>,
    pub supplier_confirmed_at: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Delivery> for DeliveryEntity {
    fn from(delivery: &Delivery) -> Self {
        let (pin_code, pin_verified, photo) = match &delivery.verification {
            Verification::Pin { code, verified } => (Some(code.clone()), *verified, None),
            Verification::Photo { evidence } => (None, false, evidence.clone()),
        };
        Self {
            id: delivery.id,
            order_id: delivery.order_id,
            stage: delivery.stage.to_string(),
            delivery_date: delivery.window.date,
            starts_at: delivery.window.starts_at,
            ends_at: delivery.window.ends_at,
            recipient_name: delivery.recipient.name.clone(),
            recipient_phone: delivery.recipient.phone.clone(),
            verification_method: delivery.verification.method().to_string(),
            pin_code,
            pin_verified,
            photo_content_type: photo.as_ref().map(|p| p.content_type.clone()),
            photo_sha256: photo.as_ref().map(|p| p.sha256.clone()),
            photo_size_bytes: photo.as_ref().map(|p| p.size_bytes),
            supplier_confirmed_at: delivery.supplier_confirmed_at,
            buyer_confirmed_at: delivery.buyer_confirmed_at,
            created_at: delivery.created_at,
            updated_at: delivery.updated_at,
        }
    }
}

impl TryFrom<DeliveryEntity> for Delivery {
    type Error = StoreError;

    fn try_from(entity: DeliveryEntity) -> Result<Self, Self::Error> {
        let verification = match entity.verification_method.parse::<VerificationMethod>()? {
            VerificationMethod::Pin => Verification::Pin {
                code: entity.pin_code.ok_or_else(|| {
                    StoreError::Corrupt(format!("delivery {} has no PIN", entity.id))
                })?,
                verified: entity.pin_verified,
            },
            VerificationMethod::Photo => Verification::Photo {
                evidence: match (entity.photo_content_type, entity.photo_sha256, entity.photo_size_bytes) {
                    (Some(content_type), Some(sha256), Some(size_bytes)) => Some(PhotoEvidence {
                        content_type,
                        sha256,
                        size_bytes,
                    }),
                    _ => None,
                },
            },
        };
        Ok(Self {
            id: entity.id,
            order_id: entity.order_id,
            stage: entity.stage.parse()?,
            window: DeliveryWindow {
                date: entity.delivery_date,
                starts_at: entity.starts_at,
                ends_at: entity.ends_at,
            },
            recipient: Recipient {
                name: entity.recipient_name,
                phone: entity.recipient_phone,
            },
            verification,
            supplier_confirmed_at: entity.supplier_confirmed_at,
            buyer_confirmed_at: entity.buyer_confirmed_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::deliveries)]
pub struct DeliveryChangeset {
    pub stage: String,
    pub supplier_confirmed_at: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub pin_verified: Option<bool>,
    pub photo_content_type: Option<String>,
    pub photo_sha256: Option<String>,
    pub photo_size_bytes: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryChangeset {
    pub fn new(transition: DeliveryTransition, changes: DeliveryChanges, now: DateTime<Utc>) -> Self {
        let photo = changes.photo;
        Self {
            stage: transition.target().to_string(),
            supplier_confirmed_at: changes.supplier_confirmed_at,
            buyer_confirmed_at: changes.buyer_confirmed_at,
            pin_verified: changes.pin_verified.then_some(true),
            photo_content_type: photo.as_ref().map(|p| p.content_type.clone()),
            photo_sha256: photo.as_ref().map(|p| p.sha256.clone()),
            photo_size_bytes: photo.as_ref().map(|p| p.size_bytes),
            updated_at: now,
        }
    }
}

// Payments

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub intent_id: String,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub refunded_amount: Decimal,
    pub currency: String,
    pub status: String,
    pub failure_reason: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub release_eligible_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentEntity {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            provider: payment.provider.clone(),
            intent_id: payment.intent_id.clone(),
            transaction_id: payment.transaction_id.clone(),
            amount: payment.amount.value(),
            refunded_amount: payment.refunded_amount.value(),
            currency: payment.currency.clone(),
            status: payment.status.to_string(),
            failure_reason: payment.failure_reason.clone(),
            captured_at: payment.captured_at,
            release_eligible_at: payment.release_eligible_at,
            released_at: payment.released_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

impl TryFrom<PaymentEntity> for Payment {
    type Error = StoreError;

    fn try_from(entity: PaymentEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            order_id: entity.order_id,
            provider: entity.provider,
            intent_id: entity.intent_id,
            transaction_id: entity.transaction_id,
            amount: Money::from_decimal_unchecked(entity.amount),
            refunded_amount: Money::from_decimal_unchecked(entity.refunded_amount),
            currency: entity.currency,
            status: entity.status.parse()?,
            failure_reason: entity.failure_reason,
            captured_at: entity.captured_at,
            release_eligible_at: entity.release_eligible_at,
            released_at: entity.released_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentChangeset {
    pub status: Option<String>,
    pub transaction_id: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub failure_reason: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub release_eligible_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PaymentChangeset {
    pub fn new(status: Option<String>, changes: PaymentChanges, now: DateTime<Utc>) -> Self {
        Self {
            status,
            transaction_id: changes.transaction_id,
            refunded_amount: changes.refunded_amount.map(|m| m.value()),
            failure_reason: changes.failure_reason,
            captured_at: changes.captured_at,
            release_eligible_at: changes.release_eligible_at,
            released_at: changes.released_at,
            updated_at: Some(now),
        }
    }
}

// Disputes

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::disputes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DisputeEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub opened_by: Uuid,
    pub reason: String,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&Dispute> for DisputeEntity {
    fn from(dispute: &Dispute) -> Self {
        Self {
            id: dispute.id,
            order_id: dispute.order_id,
            opened_by: dispute.opened_by,
            reason: dispute.reason.clone(),
            status: dispute.status.to_string(),
            resolution: dispute.resolution.clone(),
            created_at: dispute.created_at,
            updated_at: dispute.updated_at,
            resolved_at: dispute.resolved_at,
        }
    }
}

impl TryFrom<DisputeEntity> for Dispute {
    type Error = StoreError;

    fn try_from(entity: DisputeEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            order_id: entity.order_id,
            opened_by: entity.opened_by,
            reason: entity.reason,
            status: entity.status.parse()?,
            resolution: entity.resolution,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            resolved_at: entity.resolved_at,
        })
    }
}

// Webhook audit

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WebhookEventEntity {
    pub id: Uuid,
    pub provider_event_id: Option<String>,
    pub event_type: Option<String>,
    pub payload: String,
    pub signature_valid: bool,
    pub status: String,
    pub error: Option<String>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<i64>,
}

impl From<&WebhookEvent> for WebhookEventEntity {
    fn from(event: &WebhookEvent) -> Self {
        Self {
            id: event.id,
            provider_event_id: event.provider_event_id.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            signature_valid: event.signature_valid,
            status: event.status.to_string(),
            error: event.error.clone(),
            payment_id: event.payment_id,
            transaction_id: event.transaction_id.clone(),
            received_at: event.received_at,
            claimed_at: event.claimed_at,
            processed_at: event.processed_at,
            processing_ms: event.processing_ms,
        }
    }
}

impl TryFrom<WebhookEventEntity> for WebhookEvent {
    type Error = StoreError;

    fn try_from(entity: WebhookEventEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            provider_event_id: entity.provider_event_id,
            event_type: entity.event_type,
            payload: entity.payload,
            signature_valid: entity.signature_valid,
            status: entity.status.parse()?,
            error: entity.error,
            payment_id: entity.payment_id,
            transaction_id: entity.transaction_id,
            received_at: entity.received_at,
            claimed_at: entity.claimed_at,
            processed_at: entity.processed_at,
            processing_ms: entity.processing_ms,
        })
    }
}

// Activities

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_activities)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderActivityEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub kind: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderActivity> for OrderActivityEntity {
    fn from(activity: &OrderActivity) -> Self {
        Self {
            id: activity.id,
            order_id: activity.order_id,
            actor_id: activity.actor_id,
            kind: activity.kind.to_string(),
            description: activity.description.clone(),
            created_at: activity.created_at,
        }
    }
}

impl TryFrom<OrderActivityEntity> for OrderActivity {
    type Error = StoreError;

    fn try_from(entity: OrderActivityEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            order_id: entity.order_id,
            actor_id: entity.actor_id,
            kind: entity.kind.parse()?,
            description: entity.description,
            created_at: entity.created_at,
        })
    }
}
