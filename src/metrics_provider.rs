use std::sync::LazyLock;

use hyper::StatusCode;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry,
};
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry as PrometheusRegistry, TextEncoder,
};
use tracing::error;

use crate::federation::{FederationError, HandshakeState};
use crate::pipeline::Error;
use crate::policy::Decision;

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

// Policies that are not registered share one label value.
const UNREGISTERED_POLICY: &str = "unregistered";

pub struct MetricsProvider {
    registry: PrometheusRegistry,
    http_requests: IntCounterVec,
    http_request_duration: HistogramVec,
    http_requests_in_flight: IntGauge,
    handshake_transitions: IntCounterVec,
    handshake_failures: IntCounterVec,
    policy_decisions: IntCounterVec,
}

fn registration_error(name: &'static str) -> impl FnOnce(prometheus::Error) -> Error {
    move |error| {
        error!("Unable to create {name} metric: {error}");
        Error::Internal(format!("Unable to create {name} metric"))
    }
}

/// `2xx`, `4xx`... keeps the request counter's cardinality fixed.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = PrometheusRegistry::new();

        let http_requests = register_int_counter_vec_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests, by method and status class.",
            &["method", "status"],
            &registry
        )
        .map_err(registration_error("http_requests_total"))?;

        let http_request_duration = register_histogram_vec_with_registry!(
            "http_request_duration_ms",
            "The HTTP request latencies in milliseconds, by status class.",
            &["status"],
            vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0],
            &registry
        )
        .map_err(registration_error("http_request_duration_ms"))?;

        let http_requests_in_flight = register_int_gauge_with_registry!(
            "http_requests_in_flight",
            "The current number of open HTTP connections.",
            &registry
        )
        .map_err(registration_error("http_requests_in_flight"))?;

        let handshake_transitions = register_int_counter_vec_with_registry!(
            "federation_handshake_transitions_total",
            "External sign-in handshake transitions, by provider and reached state.",
            &["provider", "state"],
            &registry
        )
        .map_err(registration_error("federation_handshake_transitions_total"))?;

        let handshake_failures = register_int_counter_vec_with_registry!(
            "federation_handshake_failures_total",
            "Failed external sign-in handshakes, by provider and cause.",
            &["provider", "cause"],
            &registry
        )
        .map_err(registration_error("federation_handshake_failures_total"))?;

        let policy_decisions = register_int_counter_vec_with_registry!(
            "policy_decisions_total",
            "Authorization policy evaluations, by policy and decision.",
            &["policy", "decision"],
            &registry
        )
        .map_err(registration_error("policy_decisions_total"))?;

        Ok(Self {
            registry,
            http_requests,
            http_request_duration,
            http_requests_in_flight,
            handshake_transitions,
            handshake_failures,
            policy_decisions,
        })
    }

    pub fn connection_opened(&self) {
        self.http_requests_in_flight.inc();
    }

    pub fn connection_closed(&self) {
        self.http_requests_in_flight.dec();
    }

    pub fn record_request(&self, method: &str, status: StatusCode, elapsed_ms: f64) {
        let method = match method {
            "GET" | "HEAD" | "POST" | "PUT" | "PATCH" | "DELETE" | "OPTIONS" => method,
            _ => "OTHER",
        };
        let class = status_class(status);
        self.http_requests.with_label_values(&[method, class]).inc();
        self.http_request_duration
            .with_label_values(&[class])
            .observe(elapsed_ms);
    }

    pub fn record_handshake(&self, provider: &str, state: HandshakeState) {
        self.handshake_transitions
            .with_label_values(&[provider, state.as_str()])
            .inc();
    }

    pub fn record_handshake_failure(&self, provider: &str, error: &FederationError) {
        self.handshake_failures
            .with_label_values(&[provider, error.cause()])
            .inc();
    }

    /// `policy` is `None` when the evaluated name is not registered.
    pub fn record_policy_decision(&self, policy: Option<&str>, decision: Decision) {
        self.policy_decisions
            .with_label_values(&[policy.unwrap_or(UNREGISTERED_POLICY), decision.as_str()])
            .inc();
    }

    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|error| Error::Internal(format!("Unable to encode metrics: {error}")))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::FOUND), "3xx");
        assert_eq!(status_class(StatusCode::FORBIDDEN), "4xx");
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), "5xx");
    }

    #[test]
    fn test_domain_counters_are_exported() {
        let metrics = MetricsProvider::new().unwrap();
        metrics.record_request("GET", StatusCode::NOT_FOUND, 3.0);
        metrics.record_request("BREW", StatusCode::OK, 1.0);
        metrics.record_handshake("Google", HandshakeState::Merged);
        metrics.record_handshake_failure("Twitter", &FederationError::Timeout);
        metrics.record_policy_decision(Some("ManageStore"), Decision::Deny);
        metrics.record_policy_decision(None, Decision::Deny);

        let (content_type, body) = metrics.gather().unwrap();
        let body = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains(r#"http_requests_total{method="GET",status="4xx"} 1"#));
        assert!(body.contains(r#"http_requests_total{method="OTHER",status="2xx"} 1"#));
        assert!(body.contains(
            r#"federation_handshake_transitions_total{provider="Google",state="merged"} 1"#
        ));
        assert!(body.contains(
            r#"federation_handshake_failures_total{cause="timeout",provider="Twitter"} 1"#
        ));
        assert!(body.contains(r#"policy_decisions_total{decision="deny",policy="ManageStore"} 1"#));
        assert!(body.contains(r#"policy_decisions_total{decision="deny",policy="unregistered"} 1"#));
    }
}
