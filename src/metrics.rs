use lazy_static::lazy_static;
use prometheus::{self, Encoder, IntCounterVec, IntGauge, Opts, Registry};

use crate::models::ProcessResult;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Resolved task counter by outcome
    pub static ref TASKS_RESOLVED: IntCounterVec = IntCounterVec::new(
        Opts::new("tasks_resolved", "The number of tasks resolved, by outcome"),
        &["outcome"]
    ).unwrap();
    // Current worker count
    pub static ref WORKERS_ACTIVE: IntGauge = IntGauge::new(
        "workers_active", "The number of active workers"
    ).unwrap();
    // Current pending queue depth
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "queue_depth", "The number of tasks pending in the queue"
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(TASKS_RESOLVED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(WORKERS_ACTIVE.clone())).unwrap();
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
}

/// Render the registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    encoder.encode(&REGISTRY.gather(), &mut buffer).unwrap();

    String::from_utf8(buffer).unwrap()
}

/// Increments the resolved task counter, labelled by outcome
pub fn record_result(result: &ProcessResult) {
    let outcome = match result {
        ProcessResult::Success { .. } => "success".to_string(),
        ProcessResult::Failure { reason, .. } => reason.to_string(),
    };
    TASKS_RESOLVED.with_label_values(&[&outcome]).inc();
}
