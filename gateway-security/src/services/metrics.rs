use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static AUTH_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RATE_LIMIT_REJECTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static IP_LOCKOUTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static PERMISSION_CACHE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Register every collector once. Later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let auth_events = IntCounterVec::new(
        Opts::new(
            "gateway_auth_events_total",
            "Authentication events by kind and outcome",
        ),
        &["event", "outcome"],
    )?;
    let rate_limit_rejections = IntCounterVec::new(
        Opts::new(
            "gateway_rate_limit_rejections_total",
            "Requests rejected by the rate limiter",
        ),
        &["group"],
    )?;
    let ip_lockouts = IntCounter::new(
        "gateway_ip_lockouts_total",
        "IP addresses locked out after repeated failed logins",
    )?;
    let cache_events = IntCounterVec::new(
        Opts::new(
            "gateway_permission_cache_events_total",
            "Permission cache lookups by result",
        ),
        &["result"],
    )?;

    registry.register(Box::new(auth_events.clone()))?;
    registry.register(Box::new(rate_limit_rejections.clone()))?;
    registry.register(Box::new(ip_lockouts.clone()))?;
    registry.register(Box::new(cache_events.clone()))?;

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = AUTH_EVENTS_TOTAL.set(auth_events);
    let _ = RATE_LIMIT_REJECTIONS_TOTAL.set(rate_limit_rejections);
    let _ = IP_LOCKOUTS_TOTAL.set(ip_lockouts);
    let _ = PERMISSION_CACHE_EVENTS_TOTAL.set(cache_events);
    Ok(())
}

pub fn record_auth_event(event: &str, outcome: &str) {
    if let Some(counter) = AUTH_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event, outcome]).inc();
    }
}

pub fn record_rate_limit_rejection(group: &str) {
    if let Some(counter) = RATE_LIMIT_REJECTIONS_TOTAL.get() {
        counter.with_label_values(&[group]).inc();
    }
}

pub fn record_ip_lockout() {
    if let Some(counter) = IP_LOCKOUTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_permission_cache(hit: bool) {
    if let Some(counter) = PERMISSION_CACHE_EVENTS_TOTAL.get() {
        counter
            .with_label_values(&[if hit { "hit" } else { "miss" }])
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_and_exports() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        record_auth_event("login", "success");
        record_rate_limit_rejection("public");
        record_ip_lockout();

        let text = get_metrics();
        assert!(text.contains("gateway_auth_events_total"));
        assert!(text.contains("gateway_rate_limit_rejections_total"));
        assert!(text.contains("gateway_ip_lockouts_total"));
    }
}
