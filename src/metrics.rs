//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Outbound federation
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_deliveries_total", "Per-target delivery outcomes"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_delivery_attempts_total", "Individual delivery attempts"),
        &["result"]
    ).expect("metric can be created");
    pub static ref DELIVERY_DURATION_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "federelay_delivery_duration_seconds",
            "Time from first attempt to final outcome for one target"
        ).buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0])
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_activities_sent_total", "Activities handed to the delivery engine"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref RECIPIENT_RESOLUTION_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "federelay_recipient_resolution_failures_total",
        "Addressees skipped because they could not be resolved"
    ).expect("metric can be created");
    pub static ref KNOWN_SHARED_INBOXES: IntGauge = IntGauge::new(
        "federelay_known_shared_inboxes",
        "Number of shared inboxes in the registry"
    ).expect("metric can be created");

    // Inbound federation
    pub static ref INBOUND_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_inbound_verifications_total", "Inbound signature verification results"),
        &["result"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_activities_received_total", "Verified inbound activities"),
        &["activity_type"]
    ).expect("metric can be created");

    // Key cache
    pub static ref KEY_CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "federelay_key_cache_hits_total",
        "Public key cache hits"
    ).expect("metric can be created");
    pub static ref KEY_CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "federelay_key_cache_misses_total",
        "Public key cache misses"
    ).expect("metric can be created");

    // Errors
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("federelay_errors_total", "Errors returned to HTTP clients"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Must be called once per process.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))
        .expect("DELIVERY_ATTEMPTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERY_DURATION_SECONDS.clone()))
        .expect("DELIVERY_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_SENT_TOTAL.clone()))
        .expect("ACTIVITIES_SENT_TOTAL can be registered");
    REGISTRY
        .register(Box::new(RECIPIENT_RESOLUTION_FAILURES_TOTAL.clone()))
        .expect("RECIPIENT_RESOLUTION_FAILURES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KNOWN_SHARED_INBOXES.clone()))
        .expect("KNOWN_SHARED_INBOXES can be registered");
    REGISTRY
        .register(Box::new(INBOUND_VERIFICATIONS_TOTAL.clone()))
        .expect("INBOUND_VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()))
        .expect("ACTIVITIES_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_HITS_TOTAL.clone()))
        .expect("KEY_CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_MISSES_TOTAL.clone()))
        .expect("KEY_CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Activity types counted under their own label value.
const LABELLED_ACTIVITY_TYPES: [&str; 9] = [
    "Create", "Update", "Delete", "Follow", "Accept", "Reject", "Like", "Announce", "Undo",
];

/// Label value for an activity type; anything outside the known set is
/// counted as `other` so remote input cannot grow the series count.
pub fn activity_type_label(kind: &str) -> &'static str {
    LABELLED_ACTIVITY_TYPES
        .iter()
        .copied()
        .find(|known| *known == kind)
        .unwrap_or("other")
}
