//! Metric recording for scheduler components.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with the queue name
//! already bound, so components record events without repeating labels.
//! Every method is a no-op until `init_metrics()` has run.

use std::sync::Arc;

use super::prometheus::{
    ACTIVE_WORKERS, ITEMS_DISPATCHED_TOTAL, ITEMS_ENQUEUED_TOTAL, POPULATE_TOTAL, QUEUE_DEPTH,
    WORKER_EXITS_TOTAL, WORKER_LAUNCHES_TOTAL,
};

/// Records scheduler metrics for one named queue.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    queue: Arc<str>,
}

impl MetricsCollector {
    /// Create a collector that labels every metric with `queue`.
    pub fn new(queue: impl AsRef<str>) -> Self {
        Self {
            queue: Arc::from(queue.as_ref()),
        }
    }

    /// The queue label.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Record the current (approximate) queue occupancy.
    pub fn set_queue_depth(&self, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&[&*self.queue]).set(depth as f64);
        }
    }

    /// Record one item pushed onto the queue.
    pub fn record_enqueued(&self) {
        if let Some(counter) = ITEMS_ENQUEUED_TOTAL.get() {
            counter.with_label_values(&[&*self.queue]).inc();
        }
    }

    /// Record the outcome of a populate cycle.
    pub fn record_populate(&self, outcome: &str) {
        if let Some(counter) = POPULATE_TOTAL.get() {
            counter.with_label_values(&[&*self.queue, outcome]).inc();
        }
        tracing::trace!(queue = %self.queue, outcome = outcome, "Recorded populate metric");
    }

    /// Record the number of tracked workers.
    pub fn set_active_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.with_label_values(&[&*self.queue]).set(count as f64);
        }
    }

    /// Record a worker launch.
    pub fn record_worker_launch(&self) {
        if let Some(counter) = WORKER_LAUNCHES_TOTAL.get() {
            counter.with_label_values(&[&*self.queue]).inc();
        }
    }

    /// Record a worker exit with its reason (e.g. "quota", "close", "failed").
    pub fn record_worker_exit(&self, reason: &str) {
        if let Some(counter) = WORKER_EXITS_TOTAL.get() {
            counter.with_label_values(&[&*self.queue, reason]).inc();
        }
    }

    /// Record one item handed to a reader.
    pub fn record_dispatched(&self) {
        if let Some(counter) = ITEMS_DISPATCHED_TOTAL.get() {
            counter.with_label_values(&[&*self.queue]).inc();
        }
    }
}
