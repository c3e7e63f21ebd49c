use crate::app_error::AppError;
use crate::domain::money::Money;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

status_enum! {
    /// Lifecycle of an order from creation to escrow settlement.
    OrderStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        AwaitingBuyerConfirmation => "awaiting_buyer_confirmation",
        Delivered => "delivered",
        Completed => "completed",
        Disputed => "disputed",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

/// The only edges an order may move along.
///
/// Storage adapters accept a transition rather than a raw target status and
/// turn it into a conditional update keyed on [`OrderTransition::sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    /// Saga finished or provider captured the hold.
    Confirm,
    /// Supplier confirmed the handover.
    AwaitBuyerConfirmation,
    /// Buyer accepted the delivery.
    MarkDelivered,
    /// Escrow released to the supplier.
    Complete,
    OpenDispute,
    /// Dispute resolved by returning the funds to the hold.
    ReturnFromDispute,
    Cancel,
    Refund,
}

impl OrderTransition {
    pub fn sources(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            OrderTransition::Confirm => &[Pending],
            OrderTransition::AwaitBuyerConfirmation => &[Confirmed],
            OrderTransition::MarkDelivered => &[AwaitingBuyerConfirmation],
            OrderTransition::Complete => &[Delivered],
            OrderTransition::OpenDispute => &[AwaitingBuyerConfirmation, Delivered],
            OrderTransition::ReturnFromDispute => &[Disputed],
            OrderTransition::Cancel => &[Pending, Confirmed],
            OrderTransition::Refund => &[
                Pending,
                Confirmed,
                AwaitingBuyerConfirmation,
                Delivered,
                Disputed,
            ],
        }
    }

    pub fn target(self) -> OrderStatus {
        match self {
            OrderTransition::Confirm => OrderStatus::Confirmed,
            OrderTransition::AwaitBuyerConfirmation => OrderStatus::AwaitingBuyerConfirmation,
            OrderTransition::MarkDelivered => OrderStatus::Delivered,
            OrderTransition::Complete => OrderStatus::Completed,
            OrderTransition::OpenDispute => OrderStatus::Disputed,
            OrderTransition::ReturnFromDispute => OrderStatus::Delivered,
            OrderTransition::Cancel => OrderStatus::Cancelled,
            OrderTransition::Refund => OrderStatus::Refunded,
        }
    }

    pub fn allows(self, current: OrderStatus) -> bool {
        self.sources().contains(&current)
    }

    /// Checks the edge against the current status without touching storage.
    pub fn check(self, current: OrderStatus) -> Result<OrderStatus, AppError> {
        if self.allows(current) {
            Ok(self.target())
        } else {
            Err(AppError::BusinessRule(format!(
                "order cannot move to `{}` from `{}`",
                self.target(),
                current
            )))
        }
    }
}

/// Fields written alongside an order transition.
#[derive(Debug, Clone, Default)]
pub struct OrderChanges {
    pub cancellation_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl OrderChanges {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            cancellation_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryWindow {
    pub date: NaiveDate,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAddress {
    pub line: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub supplier_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub total: Money,
    pub currency: String,
    pub delivery_window: DeliveryWindow,
    pub delivery_address: DeliveryAddress,
    pub vehicle_type: String,
    pub cancellation_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_buyer(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id
    }

    pub fn is_supplier(&self, user_id: Uuid) -> bool {
        self.supplier_id == user_id
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.is_buyer(user_id) || self.is_supplier(user_id)
    }

    /// `total == subtotal + delivery_fee`
    pub fn pricing_is_consistent(&self) -> bool {
        self.total == self.subtotal + self.delivery_fee
    }

    pub fn apply(&mut self, transition: Option<OrderTransition>, changes: &OrderChanges, now: DateTime<Utc>) {
        if let Some(transition) = transition {
            self.status = transition.target();
        }
        if let Some(reason) = &changes.cancellation_reason {
            self.cancellation_reason = Some(reason.clone());
        }
        if changes.paid_at.is_some() {
            self.paid_at = changes.paid_at;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
    pub created_at: DateTime<Utc>,
}

/// `ORD-YYYYMMDD-XXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}
