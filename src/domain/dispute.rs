use crate::domain::order::OrderTransition;
use crate::domain::payment::PaymentTransition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

status_enum! {
    DisputeStatus {
        Opened => "opened",
        Investigating => "investigating",
        Escalated => "escalated",
        Resolved => "resolved",
    }
}

impl DisputeStatus {
    /// Anything not yet resolved blocks confirmation and release.
    pub fn is_active(&self) -> bool {
        !matches!(self, DisputeStatus::Resolved)
    }
}

/// Outcome handed down by the administrative resolution process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// Unfreeze: the funds go back to the escrow hold.
    ReturnToHold,
    /// Give the funds back to the buyer.
    Refund,
}

impl DisputeResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeResolution::ReturnToHold => "return_to_hold",
            DisputeResolution::Refund => "refund",
        }
    }

    /// Payment and order edges applied together with the resolution.
    pub fn transitions(self) -> (PaymentTransition, OrderTransition) {
        match self {
            DisputeResolution::ReturnToHold => {
                (PaymentTransition::Unfreeze, OrderTransition::ReturnFromDispute)
            }
            DisputeResolution::Refund => (PaymentTransition::Refund, OrderTransition::Refund),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Dispute {
    pub id: Uuid,
    pub order_id: Uuid,
    pub opened_by: Uuid,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn open(order_id: Uuid, opened_by: Uuid, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            opened_by,
            reason: reason.into(),
            status: DisputeStatus::Opened,
            resolution: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }
}
