use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use hearth_domain::CorrelationId;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Stamp every request with a correlation id: honor an inbound
/// `x-correlation-id` header, mint one otherwise, and echo it on the
/// response.
async fn correlation(mut req: Request, next: Next) -> Response {
    let correlation = req
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<CorrelationId>().ok())
        .unwrap_or_default();
    req.extensions_mut().insert(correlation);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&correlation.to_string()) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Health & metrics
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        // Devices
        .route(
            "/devices/:controller/:component/intent",
            post(handlers::post_intent),
        )
        .route("/devices/:controller/:component/twin", get(handlers::get_twin))
        .route(
            "/devices/:controller/:component/overrides",
            get(handlers::get_device_overrides),
        )
        .route(
            "/devices/:controller/:component/overrides/effective",
            get(handlers::get_effective_override),
        )
        .route(
            "/devices/:controller/:component/override/:category",
            put(handlers::put_device_override).delete(handlers::delete_device_override),
        )
        // Systems
        .route("/v1/systems", post(handlers::create_system).get(handlers::list_systems))
        .route("/v1/systems/:id", get(handlers::get_system))
        .route(
            "/v1/systems/:id/configuration",
            axum::routing::patch(handlers::patch_system_configuration),
        )
        .route("/v1/systems/:id/devices", post(handlers::add_system_device))
        .route(
            "/v1/systems/:id/devices/:controller/:component",
            axum::routing::delete(handlers::remove_system_device),
        )
        .route("/v1/systems/:id/fail-safe", post(handlers::post_fail_safe))
        .route(
            "/v1/systems/:id/override/:category",
            put(handlers::put_system_override).delete(handlers::delete_system_override),
        )
        // Audit
        .route("/v1/audit", get(handlers::query_audit))
        .route_layer(middleware::from_fn(correlation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
