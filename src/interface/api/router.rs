//! API Router configuration

use super::access_gate::access_gate;
use super::calls_handler::{
    answer_call, call_doorman, decline_call, end_call, get_active_calls, get_call_history,
    get_call_status, get_pending_calls, start_call,
};
use super::dto::ApiResponse;
use super::health_handler::{health_check, service_status};
use super::metrics_handler::metrics_handler;
use super::state::AppState;
use super::tokens_handler::{
    generate_multiple_tokens, generate_token, standby_token, token_for_call, validate_token,
};
use axum::{
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router.
///
/// `/metrics` is mounted only when a Prometheus recorder was installed.
pub fn build_router(state: AppState, prometheus_handle: Option<PrometheusHandle>) -> Router {
    let service_routes = Router::new()
        .route("/", get(health_check))
        .route("/api/status", get(service_status));

    // Call lifecycle routes
    let call_routes = Router::new()
        .route("/api/calls/start", post(start_call))
        .route("/api/calls/call-doorman", post(call_doorman))
        .route("/api/calls/history", get(get_call_history))
        .route("/api/calls/active", get(get_active_calls))
        .route("/api/calls/pending", get(get_pending_calls))
        .route("/api/calls/:call_id/answer", post(answer_call))
        .route("/api/calls/:call_id/decline", post(decline_call))
        .route("/api/calls/:call_id/end", post(end_call))
        .route("/api/calls/:call_id/status", get(get_call_status));

    // Credential routes sit behind the access gate
    let token_routes = Router::new()
        .route("/api/tokens/generate", post(generate_token))
        .route("/api/tokens/generate-multiple", post(generate_multiple_tokens))
        .route("/api/tokens/for-call", post(token_for_call))
        .route("/api/tokens/standby", post(standby_token))
        .route("/api/tokens/validate", post(validate_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), access_gate));

    let mut router = Router::new()
        .merge(service_routes)
        .merge(call_routes)
        .merge(token_routes)
        .fallback(route_not_found)
        .with_state(state);

    if let Some(handle) = prometheus_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        router = router.merge(metrics_routes);
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn route_not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(
            format!("Route {} not found", uri.path()),
            "NOT_FOUND",
        )),
    )
}
