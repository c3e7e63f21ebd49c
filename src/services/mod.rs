//! Application services: the order saga, escrow ledger, delivery gate,
//! dispute manager and webhook processor, all written against the ports.

pub mod delivery;
pub mod disputes;
pub mod ledger;
pub mod orders;
pub mod outbox;
pub mod queries;
pub mod saga;
pub mod webhooks;

use uuid::Uuid;

use crate::config::EscrowConfig;
use crate::domain::activity::{ActivityKind, OrderActivity};
use crate::domain::ports::{ActivityRepository, GatewayRef, RepositoryRef};

use delivery::DeliveryConfirmationGate;
use disputes::DisputeManager;
use ledger::EscrowLedger;
use orders::OrderAggregateBuilder;
use outbox::Outbox;
use queries::OrderQueries;
use webhooks::WebhookProcessor;

/// Appends to the activity log. The log is an audit trail, so a failed
/// append is reported but never undoes the transition it describes.
pub(crate) async fn record_activity(
    repo: &RepositoryRef,
    order_id: Uuid,
    actor_id: Option<Uuid>,
    kind: ActivityKind,
    description: impl Into<String>,
) {
    let activity = OrderActivity::new(order_id, actor_id, kind, description);
    if let Err(err) = repo.append_activity(activity).await {
        tracing::error!(%order_id, %kind, "Failed to append order activity: {}", err);
    }
}

/// Every service wired over the same repository, gateway and outbox.
#[derive(Clone)]
pub struct EscrowServices {
    pub repo: RepositoryRef,
    pub orders: OrderAggregateBuilder,
    pub ledger: EscrowLedger,
    pub delivery: DeliveryConfirmationGate,
    pub disputes: DisputeManager,
    pub webhooks: WebhookProcessor,
    pub queries: OrderQueries,
}

impl EscrowServices {
    pub fn new(repo: RepositoryRef, gateway: GatewayRef, outbox: Outbox, escrow: EscrowConfig) -> Self {
        let ledger = EscrowLedger::new(repo.clone(), escrow.release_delay);
        let disputes = DisputeManager::new(repo.clone(), gateway.clone(), outbox.clone());
        Self {
            orders: OrderAggregateBuilder::new(
                repo.clone(),
                gateway.clone(),
                ledger.clone(),
                outbox.clone(),
                escrow.clone(),
            ),
            delivery: DeliveryConfirmationGate::new(
                repo.clone(),
                ledger.clone(),
                disputes.clone(),
                outbox.clone(),
            ),
            webhooks: WebhookProcessor::new(
                repo.clone(),
                gateway,
                ledger.clone(),
                outbox,
                escrow.webhook_stale_after,
            ),
            queries: OrderQueries::new(repo.clone()),
            ledger,
            disputes,
            repo,
        }
    }
}
