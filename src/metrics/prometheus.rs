//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by quasiqueue and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Serializes initialization so every static comes from the same registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all quasiqueue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Approximate number of messages in the shared queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of tracked workers, labeled by queue name.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Total workers launched, labeled by queue name.
pub static WORKER_LAUNCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total worker exits, labeled by queue name and exit reason.
pub static WORKER_EXITS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total items pushed onto the queue, labeled by queue name.
pub static ITEMS_ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total items handed to a reader, labeled by queue name.
pub static ITEMS_DISPATCHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total populate cycles, labeled by queue name and outcome.
pub static POPULATE_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("quasiqueue_queue_depth", "Approximate number of queued messages"),
        &["queue"],
    )?;

    let items_enqueued_total = CounterVec::new(
        Opts::new("quasiqueue_items_enqueued_total", "Total items pushed onto the queue"),
        &["queue"],
    )?;

    let populate_total = CounterVec::new(
        Opts::new("quasiqueue_populate_total", "Total populate cycles by outcome"),
        &["queue", "outcome"],
    )?;

    // Worker metrics
    let active_workers = GaugeVec::new(
        Opts::new("quasiqueue_active_workers", "Number of tracked workers"),
        &["queue"],
    )?;

    let worker_launches_total = CounterVec::new(
        Opts::new("quasiqueue_worker_launches_total", "Total workers launched"),
        &["queue"],
    )?;

    let worker_exits_total = CounterVec::new(
        Opts::new("quasiqueue_worker_exits_total", "Total worker exits by reason"),
        &["queue", "reason"],
    )?;

    let items_dispatched_total = CounterVec::new(
        Opts::new(
            "quasiqueue_items_dispatched_total",
            "Total items handed to a reader",
        ),
        &["queue"],
    )?;

    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(items_enqueued_total.clone()))?;
    registry.register(Box::new(populate_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(worker_launches_total.clone()))?;
    registry.register(Box::new(worker_exits_total.clone()))?;
    registry.register(Box::new(items_dispatched_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ITEMS_ENQUEUED_TOTAL.set(items_enqueued_total);
    let _ = POPULATE_TOTAL.set(populate_total);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = WORKER_LAUNCHES_TOTAL.set(worker_launches_total);
    let _ = WORKER_EXITS_TOTAL.set(worker_exits_total);
    let _ = ITEMS_DISPATCHED_TOTAL.set(items_dispatched_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        init_metrics().expect("metrics should initialize");
        if let Some(counter) = POPULATE_TOTAL.get() {
            counter.with_label_values(&["export-test", "filled"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("quasiqueue_populate_total"));
    }
}
