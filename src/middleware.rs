use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::app_error::AppError;

/// Set by the upstream API gateway once it has authenticated the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, available to handlers as `Extension<Actor>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

/// Rejects requests without a valid caller id with 401.
pub async fn caller_identity(mut req: Request, next: Next) -> Result<Response, AppError> {
    let actor = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .map(Actor)
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
