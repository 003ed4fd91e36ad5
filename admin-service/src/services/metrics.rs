use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static AUTH_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SECURITY_ALERTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static MALFORMED_REQUIREMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("http_requests_total metric definition is valid");

    let auth_failures = IntCounterVec::new(
        Opts::new(
            "auth_failures_total",
            "Authentication gate failures by taxonomy code",
        ),
        &["code"],
    )
    .expect("auth_failures_total metric definition is valid");

    let security_alerts = IntCounterVec::new(
        Opts::new("security_alerts_total", "Security alerts raised by severity"),
        &["severity"],
    )
    .expect("security_alerts_total metric definition is valid");

    // Counted apart from FORBIDDEN: a malformed requirement is a caller
    // bug, not an authorization outcome.
    let malformed_requirements = IntCounterVec::new(
        Opts::new(
            "malformed_permission_requirements_total",
            "Permission checks rejected because the requirement itself was malformed",
        ),
        &["source"],
    )
    .expect("malformed_permission_requirements_total metric definition is valid");

    for collector in [
        &requests_total,
        &auth_failures,
        &security_alerts,
        &malformed_requirements,
    ] {
        if let Err(e) = registry.register(Box::new(collector.clone())) {
            tracing::error!("Failed to register metrics collector: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }

    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = AUTH_FAILURES_TOTAL.set(auth_failures);
    let _ = SECURITY_ALERTS_TOTAL.set(security_alerts);
    let _ = MALFORMED_REQUIREMENTS_TOTAL.set(malformed_requirements);
}

pub fn record_auth_failure(code: &str) {
    if let Some(counter) = AUTH_FAILURES_TOTAL.get() {
        counter.with_label_values(&[code]).inc();
    }
}

pub fn record_security_alert(severity: &str) {
    if let Some(counter) = SECURITY_ALERTS_TOTAL.get() {
        counter.with_label_values(&[severity]).inc();
    }
}

pub fn record_malformed_requirement() {
    if let Some(counter) = MALFORMED_REQUIREMENTS_TOTAL.get() {
        counter.with_label_values(&["permission_check"]).inc();
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
