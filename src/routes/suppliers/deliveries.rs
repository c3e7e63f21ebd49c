use axum::{
    Extension, Json,
    extract::{DefaultBodyLimit, Path, State},
    response::IntoResponse,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    domain::delivery::{Delivery, PhotoUpload},
    middleware::{self, Actor},
    services::delivery::SupplierProof,
};

/// Base64 inflates the 5 MiB photo ceiling by a third.
const BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Supplier-facing delivery routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/suppliers/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(confirm_delivery))
            .layer(DefaultBodyLimit::max(BODY_LIMIT))
            .route_layer(axum::middleware::from_fn(middleware::caller_identity)),
    )
}

#[derive(Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
enum SupplierConfirmReq {
    Pin {
        pin: String,
    },
    Photo {
        content_type: String,
        /// Base64 encoded image bytes.
        data: String,
    },
}

impl TryFrom<SupplierConfirmReq> for SupplierProof {
    type Error = AppError;

    fn try_from(req: SupplierConfirmReq) -> Result<Self, Self::Error> {
        match req {
            SupplierConfirmReq::Pin { pin } => Ok(SupplierProof::Pin(pin)),
            SupplierConfirmReq::Photo { content_type, data } => {
                let bytes = STANDARD
                    .decode(data.trim())
                    .map_err(|e| AppError::BadRequest(format!("photo is not valid base64: {e}")))?;
                Ok(SupplierProof::Photo(PhotoUpload { content_type, bytes }))
            }
        }
    }
}

/// Supplier confirms the handover with the delivery PIN or a photo.
#[utoipa::path(
    post,
    path = "/{id}/confirm-delivery",
    tags = ["Suppliers"],
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-user-id" = Uuid, Header, description = "Supplier id")
    ),
    request_body = SupplierConfirmReq,
    responses(
        (status = 200, description = "Supplier confirmed delivery", body = StdResponse<Delivery, String>),
        (status = 400, description = "Wrong proof kind or rejected photo"),
        (status = 409, description = "Incorrect PIN, already confirmed or disputed"),
        (status = 500, description = "Delivery confirmed but the order could not follow")
    )
)]
async fn confirm_delivery(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(supplier_id)): Extension<Actor>,
    Json(body): Json<SupplierConfirmReq>,
) -> Result<impl IntoResponse, AppError> {
    let proof = SupplierProof::try_from(body)?;
    let delivery = state
        .services
        .delivery
        .supplier_confirm(supplier_id, id, proof)
        .await?;

    Ok(StdResponse {
        data: Some(delivery.redacted()),
        message: Some("Supplier confirmed delivery"),
    })
}
