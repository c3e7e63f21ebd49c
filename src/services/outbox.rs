use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::domain::notification::{NotificationKind, OutboundNotification};
use crate::domain::order::Order;
use crate::domain::ports::NotificationSink;

/// Fire-and-forget queue of notifications, drained by [`dispatch_loop`].
///
/// Publishing never fails the caller: messages are only queued after the
/// state change they describe has been written.
#[derive(Clone)]
pub struct Outbox {
    sender: UnboundedSender<OutboundNotification>,
}

impl Outbox {
    pub fn channel() -> (Self, UnboundedReceiver<OutboundNotification>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn publish(&self, order: &Order, kind: NotificationKind) {
        let notification = OutboundNotification {
            order_id: order.id,
            kind,
            recipients: vec![order.buyer_id, order.supplier_id],
        };
        if self.sender.send(notification).is_err() {
            tracing::warn!(order_id = %order.id, ?kind, "Notification queue closed, dropping message");
        }
    }
}

pub async fn dispatch_loop(mut receiver: UnboundedReceiver<OutboundNotification>, sink: Arc<dyn NotificationSink>) {
    while let Some(notification) = receiver.recv().await {
        if let Err(err) = sink.send(&notification).await {
            tracing::warn!(
                order_id = %notification.order_id,
                kind = ?notification.kind,
                "Failed to deliver notification: {:#}",
                err
            );
        }
    }
    tracing::debug!("Notification queue drained");
}

pub fn spawn_dispatcher(
    receiver: UnboundedReceiver<OutboundNotification>,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(dispatch_loop(receiver, sink))
}
