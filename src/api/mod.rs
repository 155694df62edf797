//! REST API layer: route handlers, DTOs, and router composition.
//!
//! User endpoints are mounted under `/api/v1`, the control plane under
//! `/internal` and the webhook at the root.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;

#[cfg(test)]
mod tests;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Upper bound for one request, including chain reads made inline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the complete application router with state and layers applied.
pub fn build_router(state: AppState) -> Router {
    let internal = handlers::ops::routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::require_internal_auth,
    ));

    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .nest("/internal", internal)
        .merge(handlers::webhook::routes())
        .merge(handlers::system::routes())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    with_docs(router)
}

#[cfg(feature = "swagger-ui")]
fn with_docs(router: Router) -> Router {
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;

    router.merge(SwaggerUi::new("/swagger-ui").url(openapi::OPENAPI_PATH, openapi::ApiDoc::openapi()))
}

#[cfg(not(feature = "swagger-ui"))]
fn with_docs(router: Router) -> Router {
    use axum::Json;
    use axum::routing::get;
    use utoipa::OpenApi;

    router.route(
        openapi::OPENAPI_PATH,
        get(|| async { Json(openapi::ApiDoc::openapi()) }),
    )
}
