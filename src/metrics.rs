//! Prometheus metrics registry and metric definitions.
//!
//! The upgrade is a one-shot process, so instead of serving `/metrics` the
//! exposition is written to a file for the node-exporter textfile collector.

use crate::errors::MigrateError;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::path::Path;

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("collab_schema_upgrade".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Database operations issued, by kind and outcome
pub static OPERATION_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("operations_total", "Total number of migration operations issued");
    let c = IntCounterVec::new(opts, &["kind", "outcome"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Documents changed by update operations, by collection
pub static DOCUMENTS_MODIFIED: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("documents_modified_total", "Documents modified by migration updates");
    let c = IntCounterVec::new(opts, &["collection"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of step durations
pub static STEP_HISTOGRAM: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("step_duration_seconds", "Duration of each migration step in seconds");
    let h = HistogramVec::new(opts, &["step"]).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}

/// Write the current exposition to `path`, replacing any previous file.
pub fn write_metrics(path: &Path) -> Result<(), MigrateError> {
    std::fs::write(path, gather_metrics())
        .map_err(|e| MigrateError::Io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_includes_namespaced_metrics() {
        OPERATION_COUNTER.with_label_values(&["create_indexes", "ok"]).inc();
        DOCUMENTS_MODIFIED.with_label_values(&["messages"]).inc_by(3);
        STEP_HISTOGRAM.with_label_values(&["1"]).observe(0.25);

        let text = gather_metrics();
        assert!(text.contains("collab_schema_upgrade_operations_total"));
        assert!(text.contains(r#"collection="messages""#));
        assert!(text.contains("collab_schema_upgrade_step_duration_seconds_bucket"));
    }
}
