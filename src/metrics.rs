//! Metrics helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is bundled; whoever
//! embeds the gateway installs a recorder. Without one every call is a no-op.
//!
//! Families:
//! * `gateway_requests_total` (counter; method, status)
//! * `gateway_request_duration_seconds` (histogram; method)
//! * `gateway_upstream_requests_total` (counter; service, outcome)
//! * `gateway_upstream_request_duration_seconds` (histogram; service)
//! * `gateway_auth_rejections_total` (counter; reason)
//! * `gateway_service_health_status` (gauge per service, 1 healthy / 0 unhealthy)
//!
//! Paths are deliberately not a label: proxied paths are unbounded.
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const GATEWAY_REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const GATEWAY_UPSTREAM_REQUESTS_TOTAL: &str = "gateway_upstream_requests_total";
pub const GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS: &str =
    "gateway_upstream_request_duration_seconds";
pub const GATEWAY_AUTH_REJECTIONS_TOTAL: &str = "gateway_auth_rejections_total";
pub const GATEWAY_SERVICE_HEALTH_STATUS: &str = "gateway_service_health_status";

pub fn set_service_health_status(service: &str, is_healthy: bool) {
    let value = if is_healthy { 1.0 } else { 0.0 };
    gauge!(GATEWAY_SERVICE_HEALTH_STATUS, "service" => service.to_string()).set(value);
}

pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        GATEWAY_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(method: &str, duration: Duration) {
    histogram!(GATEWAY_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_upstream_request_total(service: &str, outcome: &str) {
    counter!(
        GATEWAY_UPSTREAM_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_upstream_request_duration(service: &str, duration: Duration) {
    histogram!(
        GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS,
        "service" => service.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_auth_rejection(reason: &str) {
    counter!(GATEWAY_AUTH_REJECTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// RAII timer for one upstream call; records on drop, including early returns.
pub struct UpstreamRequestTimer {
    start: Instant,
    service: String,
}

impl UpstreamRequestTimer {
    pub fn new(service: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for UpstreamRequestTimer {
    fn drop(&mut self) {
        record_upstream_request_duration(&self.service, self.start.elapsed());
    }
}

/// Register metric descriptions with the installed recorder. Safe to call again.
pub fn init_metrics() -> eyre::Result<()> {
    describe_counter!(
        GATEWAY_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests answered by the gateway."
    );
    describe_histogram!(
        GATEWAY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests answered by the gateway."
    );
    describe_counter!(
        GATEWAY_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Requests dispatched to backend services, by outcome."
    );
    describe_histogram!(
        GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time until a backend service produced a response head."
    );
    describe_counter!(
        GATEWAY_AUTH_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests denied by the auth gate, by reason."
    );
    describe_gauge!(
        GATEWAY_SERVICE_HEALTH_STATUS,
        "Result of the last health probe per service (1 healthy, 0 unhealthy)."
    );

    tracing::debug!("Gateway metric descriptions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_timer_records_on_drop() {
        let timer = UpstreamRequestTimer::new("user-service");
        assert!(timer.elapsed() < Duration::from_secs(5));
        drop(timer);
    }

    #[test]
    fn init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }
}
