use crate::app_error::AppError;
use crate::domain::money::Money;
use crate::domain::order::DeliveryWindow;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

/// Upper bound for photo proof of delivery.
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

/// MIME types accepted as photo proof, with the leading bytes each must carry.
const PHOTO_SIGNATURES: &[(&str, &[u8])] = &[
    ("image/jpeg", &[0xFF, 0xD8, 0xFF]),
    ("image/png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
    ("image/webp", b"RIFF"),
];

status_enum! {
    /// Dual-confirmation progress of a delivery.
    DeliveryStage {
        AwaitingSupplierConfirmation => "awaiting_supplier_confirmation",
        AwaitingBuyerConfirmation => "awaiting_buyer_confirmation",
        Confirmed => "confirmed",
        Disputed => "disputed",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTransition {
    SupplierConfirm,
    BuyerConfirm,
    Dispute,
}

impl DeliveryTransition {
    pub fn source(self) -> DeliveryStage {
        match self {
            DeliveryTransition::SupplierConfirm => DeliveryStage::AwaitingSupplierConfirmation,
            DeliveryTransition::BuyerConfirm | DeliveryTransition::Dispute => {
                DeliveryStage::AwaitingBuyerConfirmation
            }
        }
    }

    pub fn target(self) -> DeliveryStage {
        match self {
            DeliveryTransition::SupplierConfirm => DeliveryStage::AwaitingBuyerConfirmation,
            DeliveryTransition::BuyerConfirm => DeliveryStage::Confirmed,
            DeliveryTransition::Dispute => DeliveryStage::Disputed,
        }
    }
}

/// Fields written alongside a delivery transition.
#[derive(Debug, Clone, Default)]
pub struct DeliveryChanges {
    pub supplier_confirmed_at: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub pin_verified: bool,
    pub photo: Option<PhotoEvidence>,
}

status_enum! {
    VerificationMethod {
        Pin => "pin",
        Photo => "photo",
    }
}

/// How the supplier proves the handover. Fixed when the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Verification {
    Pin { code: String, verified: bool },
    Photo { evidence: Option<PhotoEvidence> },
}

impl Verification {
    /// Orders at or above `threshold` get a numeric PIN, cheaper ones photo proof.
    pub fn for_total(total: Money, threshold: Money, pin_length: usize) -> Self {
        if total >= threshold {
            Verification::Pin {
                code: generate_pin(pin_length),
                verified: false,
            }
        } else {
            Verification::Photo { evidence: None }
        }
    }

    pub fn method(&self) -> VerificationMethod {
        match self {
            Verification::Pin { .. } => VerificationMethod::Pin,
            Verification::Photo { .. } => VerificationMethod::Photo,
        }
    }

    pub fn pin(&self) -> Option<&str> {
        match self {
            Verification::Pin { code, .. } => Some(code),
            Verification::Photo { .. } => None,
        }
    }

    pub fn requires_photo(&self) -> bool {
        matches!(self, Verification::Photo { .. })
    }
}

pub fn generate_pin(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Persisted trace of an accepted photo. The image itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PhotoEvidence {
    pub content_type: String,
    pub sha256: String,
    pub size_bytes: i64,
}

/// A photo as uploaded by the supplier, not yet checked.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    pub fn validate(&self) -> Result<PhotoEvidence, AppError> {
        let content_type = self.content_type.trim().to_ascii_lowercase();
        let Some((_, magic)) = PHOTO_SIGNATURES
            .iter()
            .find(|(mime, _)| *mime == content_type)
        else {
            return Err(AppError::BadRequest(format!(
                "photo type `{}` is not accepted",
                self.content_type
            )));
        };

        if self.bytes.is_empty() {
            return Err(AppError::BadRequest("photo is empty".to_string()));
        }
        if self.bytes.len() > MAX_PHOTO_BYTES {
            return Err(AppError::BadRequest(format!(
                "photo exceeds {} bytes",
                MAX_PHOTO_BYTES
            )));
        }

        let webp_ok = content_type != "image/webp"
            || self.bytes.get(8..12).is_some_and(|tag| tag == b"WEBP");
        if !self.bytes.starts_with(magic) || !webp_ok {
            return Err(AppError::BadRequest(format!(
                "photo content does not match `{content_type}`"
            )));
        }

        Ok(PhotoEvidence {
            content_type,
            sha256: hex::encode(Sha256::digest(&self.bytes)),
            size_bytes: self.bytes.len() as i64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Recipient {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage: DeliveryStage,
    pub window: DeliveryWindow,
    pub recipient: Recipient,
    pub verification: Verification,
    pub supplier_confirmed_at: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Buyer confirmation may only exist after, and not before, the supplier's.
    pub fn confirmation_order_holds(&self) -> bool {
        match (self.supplier_confirmed_at, self.buyer_confirmed_at) {
            (_, None) => true,
            (Some(supplier), Some(buyer)) => supplier <= buyer,
            (None, Some(_)) => false,
        }
    }

    pub fn apply(&mut self, transition: DeliveryTransition, changes: &DeliveryChanges, now: DateTime<Utc>) {
        self.stage = transition.target();
        if changes.supplier_confirmed_at.is_some() {
            self.supplier_confirmed_at = changes.supplier_confirmed_at;
        }
        if changes.buyer_confirmed_at.is_some() {
            self.buyer_confirmed_at = changes.buyer_confirmed_at;
        }
        match &mut self.verification {
            Verification::Pin { verified, .. } => *verified |= changes.pin_verified,
            Verification::Photo { evidence } => {
                if let Some(photo) = &changes.photo {
                    *evidence = Some(photo.clone());
                }
            }
        }
        self.updated_at = now;
    }

    /// Copy safe to show to anyone but the buyer: the PIN is blanked.
    pub fn redacted(mut self) -> Self {
        if let Verification::Pin { code, .. } = &mut self.verification {
            *code = "*".repeat(code.len());
        }
        self
    }
}
