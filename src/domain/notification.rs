use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmed,
    OrderCancelled,
    PaymentCaptured,
    PaymentFailed,
    PaymentRefunded,
    SupplierConfirmedDelivery,
    DeliveryCompleted,
    EscrowReleased,
    DisputeOpened,
    DisputeResolved,
}

/// Message handed to the notification service once a transition committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundNotification {
    pub order_id: Uuid,
    pub kind: NotificationKind,
    /// Users the message is about, typically buyer and supplier.
    pub recipients: Vec<Uuid>,
}
