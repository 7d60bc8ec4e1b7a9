//! Prometheus instruments for the query pipeline, registered in the default
//! registry and exposed on `/metrics`.

use std::sync::LazyLock;

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use tracing::warn;

use crate::models::TurnStatus;

static STAGE_DURATION_MS: LazyLock<Option<HistogramVec>> = LazyLock::new(|| {
    register_histogram_vec!(
        "rag_stage_duration_ms",
        "Duration of pipeline stages in milliseconds",
        &["stage"],
        vec![5.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .map_err(|err| warn!(error = %err, "failed to register rag_stage_duration_ms"))
    .ok()
});

static TURNS_TOTAL: LazyLock<Option<IntCounterVec>> = LazyLock::new(|| {
    register_int_counter_vec!("rag_turns_total", "Completed query turns by status", &["status"])
        .map_err(|err| warn!(error = %err, "failed to register rag_turns_total"))
        .ok()
});

pub fn observe_stage(stage: &str, millis: f64) {
    if let Some(histogram) = STAGE_DURATION_MS.as_ref() {
        histogram.with_label_values(&[stage]).observe(millis);
    }
}

pub fn count_turn(status: TurnStatus) {
    if let Some(counter) = TURNS_TOTAL.as_ref() {
        counter.with_label_values(&[status.as_str()]).inc();
    }
}

/// Text exposition of everything in the default registry.
pub fn render() -> anyhow::Result<(Vec<u8>, String)> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
