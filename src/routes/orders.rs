use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    domain::{activity::OrderActivity, order::Order},
    middleware::{self, Actor},
    services::{
        delivery::{BuyerConfirmationOutcome, BuyerDecision},
        disputes::OpenedDispute,
        orders::{CreateOrderReq, OrderAggregate},
        queries::OrderView,
    },
};

/// Buyer-facing order routes. Every route requires a caller id.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_order))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(get_order_activities))
            .routes(utoipa_axum::routes!(cancel_order))
            .routes(utoipa_axum::routes!(confirm_delivery))
            .routes(utoipa_axum::routes!(open_dispute))
            .route_layer(axum::middleware::from_fn(middleware::caller_identity)),
    )
}

/// Create an order, its delivery and the escrow hold in one go.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    params(("x-user-id" = Uuid, Header, description = "Buyer id")),
    request_body = CreateOrderReq,
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<OrderAggregate, String>),
        (status = 400, description = "Invalid order request"),
        (status = 502, description = "Payment provider failed, nothing was kept")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(Actor(buyer_id)): Extension<Actor>,
    Json(body): Json<CreateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let aggregate = state.services.orders.create(buyer_id, body).await?;

    Ok(StdResponse {
        data: Some(aggregate),
        message: Some("Created order successfully"),
    })
}

/// Fetch an order with its items, delivery, payment and active dispute.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch"),
        ("x-user-id" = Uuid, Header, description = "Buyer or supplier id")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderView, String>),
        (status = 403, description = "Caller is not a party of the order"),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(actor_id)): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.services.queries.view(actor_id, id).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Get order successfully"),
    })
}

/// Append-only history of an order.
#[utoipa::path(
    get,
    path = "/{id}/activities",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-user-id" = Uuid, Header, description = "Buyer or supplier id")
    ),
    responses(
        (status = 200, description = "Get order activities successfully", body = StdResponse<Vec<OrderActivity>, String>)
    )
)]
async fn get_order_activities(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(actor_id)): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let activities = state.services.queries.activities(actor_id, id).await?;

    Ok(StdResponse {
        data: Some(activities),
        message: Some("Get order activities successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CancelOrderReq {
    #[serde(default)]
    reason: Option<String>,
}

/// Cancel an order before the supplier hands it over. The hold is refunded.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to cancel"),
        ("x-user-id" = Uuid, Header, description = "Buyer id")
    ),
    request_body = CancelOrderReq,
    responses(
        (status = 200, description = "Cancelled order successfully", body = StdResponse<Order, String>),
        (status = 409, description = "Order can no longer be cancelled")
    )
)]
async fn cancel_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(actor_id)): Extension<Actor>,
    Json(body): Json<CancelOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.services.orders.cancel(actor_id, id, body.reason).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Cancelled order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
enum ConfirmDeliveryReq {
    Accept,
    /// Report a problem with the delivery. Opens a dispute.
    Reject { reason: String },
}

impl From<ConfirmDeliveryReq> for BuyerDecision {
    fn from(req: ConfirmDeliveryReq) -> Self {
        match req {
            ConfirmDeliveryReq::Accept => BuyerDecision::Accept,
            ConfirmDeliveryReq::Reject { reason } => BuyerDecision::Reject { reason },
        }
    }
}

/// Buyer accepts the delivery, releasing the escrow, or rejects it.
#[utoipa::path(
    post,
    path = "/{id}/confirm-delivery",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-user-id" = Uuid, Header, description = "Buyer id")
    ),
    request_body = ConfirmDeliveryReq,
    responses(
        (status = 200, description = "Delivery confirmation recorded", body = StdResponse<BuyerConfirmationOutcome, String>),
        (status = 409, description = "Supplier has not confirmed yet, or the delivery is disputed"),
        (status = 500, description = "Confirmation recorded but the order or escrow could not follow")
    )
)]
async fn confirm_delivery(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(actor_id)): Extension<Actor>,
    Json(body): Json<ConfirmDeliveryReq>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .services
        .delivery
        .buyer_confirm(actor_id, id, body.into())
        .await?;

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Delivery confirmation recorded"),
    })
}

#[derive(Deserialize, ToSchema)]
struct OpenDisputeReq {
    reason: String,
}

/// Open a dispute and freeze the escrow. Buyer or supplier.
#[utoipa::path(
    post,
    path = "/{id}/disputes",
    tags = ["Disputes"],
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-user-id" = Uuid, Header, description = "Buyer or supplier id")
    ),
    request_body = OpenDisputeReq,
    responses(
        (status = 200, description = "Opened dispute successfully", body = StdResponse<OpenedDispute, String>),
        (status = 409, description = "Order already disputed or not disputable")
    )
)]
async fn open_dispute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Actor(actor_id)): Extension<Actor>,
    Json(body): Json<OpenDisputeReq>,
) -> Result<impl IntoResponse, AppError> {
    let opened = state.services.disputes.open(actor_id, id, &body.reason).await?;

    Ok(StdResponse {
        data: Some(opened),
        message: Some("Opened dispute successfully"),
    })
}
