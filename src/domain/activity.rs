use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

status_enum! {
    ActivityKind {
        OrderCreated => "order_created",
        OrderConfirmed => "order_confirmed",
        PaymentAuthorized => "payment_authorized",
        PaymentCaptured => "payment_captured",
        PaymentFailed => "payment_failed",
        PaymentRefunded => "payment_refunded",
        SupplierConfirmed => "supplier_confirmed",
        BuyerConfirmed => "buyer_confirmed",
        EscrowReleased => "escrow_released",
        ReleaseWithheld => "release_withheld",
        DisputeOpened => "dispute_opened",
        DisputeResolved => "dispute_resolved",
        OrderCancelled => "order_cancelled",
    }
}

/// Append-only history line for an order.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderActivity {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Empty for provider-driven changes.
    pub actor_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl OrderActivity {
    pub fn new(
        order_id: Uuid,
        actor_id: Option<Uuid>,
        kind: ActivityKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            actor_id,
            kind,
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}
