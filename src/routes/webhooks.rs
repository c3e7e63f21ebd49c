use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    api::signature::SIGNATURE_HEADER,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    domain::webhook::WebhookAuditEntry,
    middleware,
    services::webhooks::WebhookReceipt,
};

/// Provider callbacks, authenticated by signature, plus the read-only audit
/// trail, which needs a caller id.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    let audit = OpenApiRouter::new()
        .routes(utoipa_axum::routes!(list_webhook_events))
        .route_layer(axum::middleware::from_fn(middleware::caller_identity));

    OpenApiRouter::new().nest(
        "/webhooks",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(payment_webhook))
            .merge(audit),
    )
}

/// Payment provider event callback.
///
/// The raw body is verified against `x-provider-signature` before parsing.
#[utoipa::path(
    post,
    path = "/payment",
    tags = ["Webhooks"],
    params(("x-provider-signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")),
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed or already processed", body = StdResponse<WebhookReceipt, String>),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Invalid signature"),
        (status = 500, description = "Processing failed, retry later")
    )
)]
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let receipt = state.services.webhooks.receive(&body, signature).await?;

    Ok(StdResponse {
        data: Some(receipt),
        message: Some("Webhook received"),
    })
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct AuditQuery {
    /// Rows to return, newest first. Capped at 200.
    limit: Option<i64>,
}

/// Recently received provider callbacks, including rejected ones. Raw
/// payloads are not returned.
#[utoipa::path(
    get,
    path = "/events",
    tags = ["Webhooks"],
    params(
        AuditQuery,
        ("x-user-id" = Uuid, Header, description = "Caller id")
    ),
    responses(
        (status = 200, description = "Get webhook audit trail successfully", body = StdResponse<Vec<WebhookAuditEntry>, String>),
        (status = 401, description = "Missing caller id")
    )
)]
async fn list_webhook_events(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let events = state
        .services
        .webhooks
        .recent_events(query.limit.unwrap_or(50))
        .await?;

    Ok(StdResponse {
        data: Some(events),
        message: Some("Get webhook audit trail successfully"),
    })
}
