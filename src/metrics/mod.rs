//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks queue depth, worker churn and item throughput for each named
//! queue.
//!
//! # Example
//!
//! ```ignore
//! use quasiqueue::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new("crawler");
//! collector.record_enqueued();
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, ITEMS_DISPATCHED_TOTAL, ITEMS_ENQUEUED_TOTAL, POPULATE_TOTAL, QUEUE_DEPTH,
    REGISTRY, WORKER_EXITS_TOTAL, WORKER_LAUNCHES_TOTAL,
};
