pub mod orders;
pub mod suppliers;
pub mod webhooks;

use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::openapi::{Info, InfoBuilder};
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    orders::routes_with_openapi()
        .merge(suppliers::deliveries::routes_with_openapi())
        .merge(webhooks::routes_with_openapi())
}

/// Full application: API routes, Swagger UI and request tracing.
pub fn app(state: AppState) -> Router {
    let routes = routes_with_openapi();
    let mut openapi = routes.get_openapi().clone();
    openapi.info = openapi_info();

    let swagger_ui = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi);

    Router::new()
        .merge(routes)
        .merge(swagger_ui)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn openapi_info() -> Info {
    InfoBuilder::new()
        .title("Escrow OrderService API")
        .version(env!("CARGO_PKG_VERSION"))
        .build()
}
