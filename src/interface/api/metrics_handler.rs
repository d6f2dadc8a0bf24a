//! Prometheus metrics handler

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the intercom metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("intercom_calls_started_total", "Calls placed, by initiator kind");
    describe_counter!("intercom_calls_answered_total", "Calls picked up by a callee");
    describe_counter!("intercom_calls_declined_total", "Calls declined by every callee");
    describe_counter!("intercom_calls_missed_total", "Calls that rang out unanswered");
    describe_counter!("intercom_calls_ended_total", "Connected or ringing calls hung up");
    describe_counter!("intercom_push_sent_total", "Ring notifications accepted by the push service");
    describe_counter!("intercom_push_failed_total", "Ring notifications that failed to send");
    describe_counter!("intercom_credentials_issued_total", "Media and signaling credentials signed");
    describe_counter!("intercom_rate_limited_total", "Credential requests refused by the rate limiter");
    describe_gauge!("intercom_fanout_active_loops", "Calls currently ringing callees");

    Ok(handle)
}

pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus_handle.render(),
    )
        .into_response()
}
