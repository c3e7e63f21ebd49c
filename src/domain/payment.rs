use crate::app_error::AppError;
use crate::domain::money::Money;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

status_enum! {
    /// Escrow state of the funds backing an order.
    PaymentStatus {
        Authorized => "authorized",
        Held => "held",
        Released => "released",
        Refunded => "refunded",
        PartiallyRefunded => "partially_refunded",
        Frozen => "frozen",
        Failed => "failed",
    }
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Released | PaymentStatus::Refunded | PaymentStatus::Failed
        )
    }
}

/// Escrow ledger edges.
///
/// `Unfreeze` exists only for the dispute resolution contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    Capture,
    Release,
    Freeze,
    Unfreeze,
    Refund,
    PartialRefund,
    Fail,
}

impl PaymentTransition {
    pub fn sources(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            PaymentTransition::Capture => &[Authorized],
            PaymentTransition::Release => &[Held],
            PaymentTransition::Freeze => &[Held],
            PaymentTransition::Unfreeze => &[Frozen],
            PaymentTransition::Refund => &[Authorized, Held, Frozen, PartiallyRefunded],
            PaymentTransition::PartialRefund => &[Held, Frozen, PartiallyRefunded],
            PaymentTransition::Fail => &[Authorized],
        }
    }

    pub fn target(self) -> PaymentStatus {
        match self {
            PaymentTransition::Capture => PaymentStatus::Held,
            PaymentTransition::Release => PaymentStatus::Released,
            PaymentTransition::Freeze => PaymentStatus::Frozen,
            PaymentTransition::Unfreeze => PaymentStatus::Held,
            PaymentTransition::Refund => PaymentStatus::Refunded,
            PaymentTransition::PartialRefund => PaymentStatus::PartiallyRefunded,
            PaymentTransition::Fail => PaymentStatus::Failed,
        }
    }

    pub fn allows(self, current: PaymentStatus) -> bool {
        self.sources().contains(&current)
    }

    pub fn check(self, current: PaymentStatus) -> Result<PaymentStatus, AppError> {
        if self.allows(current) {
            Ok(self.target())
        } else {
            Err(AppError::BusinessRule(format!(
                "payment cannot move to `{}` from `{}`",
                self.target(),
                current
            )))
        }
    }
}

/// Fields written alongside a payment transition. `None` leaves a column as is.
#[derive(Debug, Clone, Default)]
pub struct PaymentChanges {
    pub transaction_id: Option<String>,
    pub refunded_amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub release_eligible_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub intent_id: String,
    pub transaction_id: Option<String>,
    /// Always equal to the owning order's total.
    pub amount: Money,
    pub refunded_amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub release_eligible_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: Uuid,
        provider: impl Into<String>,
        intent_id: impl Into<String>,
        amount: Money,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            provider: provider.into(),
            intent_id: intent_id.into(),
            transaction_id: None,
            amount,
            refunded_amount: Money::ZERO,
            currency: currency.into(),
            status: PaymentStatus::Authorized,
            failure_reason: None,
            captured_at: None,
            release_eligible_at: None,
            released_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> Money {
        self.amount - self.refunded_amount
    }

    /// Applies a transition in place. Used by the in-memory adapter, which
    /// has no SQL to express it.
    pub fn apply(&mut self, transition: PaymentTransition, changes: &PaymentChanges, now: DateTime<Utc>) {
        self.status = transition.target();
        if let Some(transaction_id) = &changes.transaction_id {
            self.transaction_id = Some(transaction_id.clone());
        }
        if let Some(refunded) = changes.refunded_amount {
            self.refunded_amount = refunded;
        }
        if let Some(reason) = &changes.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
        if changes.captured_at.is_some() {
            self.captured_at = changes.captured_at;
        }
        if changes.release_eligible_at.is_some() {
            self.release_eligible_at = changes.release_eligible_at;
        }
        if changes.released_at.is_some() {
            self.released_at = changes.released_at;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_requires_held() {
        assert_eq!(
            PaymentTransition::Release.check(PaymentStatus::Held).unwrap(),
            PaymentStatus::Released
        );
        for status in [
            PaymentStatus::Authorized,
            PaymentStatus::Frozen,
            PaymentStatus::Released,
            PaymentStatus::Refunded,
        ] {
            assert!(matches!(
                PaymentTransition::Release.check(status),
                Err(AppError::BusinessRule(_))
            ));
        }
    }

    #[test]
    fn test_freeze_only_from_held() {
        assert!(PaymentTransition::Freeze.allows(PaymentStatus::Held));
        assert!(!PaymentTransition::Freeze.allows(PaymentStatus::Authorized));
        assert!(!PaymentTransition::Freeze.allows(PaymentStatus::Frozen));
        assert!(!PaymentTransition::Freeze.allows(PaymentStatus::Released));
    }

    #[test]
    fn test_frozen_returns_to_held_or_refunds() {
        assert_eq!(PaymentTransition::Unfreeze.target(), PaymentStatus::Held);
        assert!(PaymentTransition::Unfreeze.allows(PaymentStatus::Frozen));
        assert!(PaymentTransition::Refund.allows(PaymentStatus::Frozen));
        assert!(!PaymentTransition::Unfreeze.allows(PaymentStatus::Held));
    }

    #[test]
    fn test_terminal_states() {
        for status in [
            PaymentStatus::Released,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
        ] {
            assert!(status.is_terminal());
            for transition in [
                PaymentTransition::Capture,
                PaymentTransition::Release,
                PaymentTransition::Freeze,
                PaymentTransition::Unfreeze,
                PaymentTransition::Refund,
                PaymentTransition::PartialRefund,
                PaymentTransition::Fail,
            ] {
                assert!(!transition.allows(status));
            }
        }
    }
}
