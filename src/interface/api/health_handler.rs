//! Service health endpoints

use super::dto::ApiResponse;
use super::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub store_reachable: bool,
    pub signing_configured: bool,
    pub push_enabled: bool,
    pub active_fanout_loops: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthSummary>> {
    Json(ApiResponse::success(HealthSummary {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0),
    }))
}

pub async fn service_status(State(state): State<AppState>) -> Json<ApiResponse<ServiceStatus>> {
    let store_reachable = match state.call_store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Call store unreachable: {}", e);
            false
        }
    };

    Json(ApiResponse::success(ServiceStatus {
        store_reachable,
        signing_configured: state.credentials.is_configured(),
        push_enabled: state.push_enabled,
        active_fanout_loops: state.calls.fanout().active_loops(),
    }))
}
