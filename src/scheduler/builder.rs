//! Queue population with backpressure and requeue suppression.
//!
//! The `QueueBuilder` is the producer side of the scheduler. Each call to
//! [`QueueBuilder::populate`] decides whether the queue needs more work,
//! pulls a block of ids from the writer, filters out ids queued too
//! recently and pushes the rest.
//!
//! # Thresholds
//!
//! Occupancy reads are approximate, so the builder keeps well clear of the
//! hard capacity bound:
//!
//! - at or above 30% occupancy the writer is not consulted at all
//! - fills never aim past 80% of capacity

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dedup::DedupCache;
use super::job::{ItemId, QueueMessage};
use super::queue::QueueWriter;
use super::settings::Settings;
use crate::error::QueueError;
use crate::handlers::{FetchRequest, Writer, WriterCapabilities};
use crate::metrics::MetricsCollector;

/// Maximum number of ids added in a single populate cycle.
pub const DEFAULT_MAX_BATCH: usize = 50;

/// Occupancy ratio at or above which population is skipped.
const BACKPRESSURE_RATIO: f64 = 0.3;

/// Occupancy ratio population aims for.
const FILL_RATIO: f64 = 0.8;

/// Result of one populate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopulateOutcome {
    /// The batch limit was reached.
    Filled,
    /// The queue is busy enough already, or it filled up mid-cycle.
    SkippedBackpressure,
    /// There was no headroom worth a fetch, or the writer ran dry.
    SkippedExhausted,
    /// The builder is closed and pushed close sentinels instead of work.
    Closed,
}

impl PopulateOutcome {
    /// Stable lowercase name, used for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            PopulateOutcome::Filled => "filled",
            PopulateOutcome::SkippedBackpressure => "skipped_backpressure",
            PopulateOutcome::SkippedExhausted => "skipped_exhausted",
            PopulateOutcome::Closed => "closed",
        }
    }

    /// Returns true for either skip outcome.
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            PopulateOutcome::SkippedBackpressure | PopulateOutcome::SkippedExhausted
        )
    }
}

impl fmt::Display for PopulateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a populate cycle should do given the current occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Occupancy is at or above the backpressure threshold.
    Backpressure,
    /// No headroom below the fill target.
    Exhausted,
    /// Fetch up to `desired` ids, asking the writer for `block_size`.
    Fetch { desired: usize, block_size: usize },
}

/// Computes the fetch plan for a queue of `capacity` holding `occupancy`
/// messages.
pub fn plan_fetch(
    capacity: usize,
    occupancy: usize,
    max_batch: usize,
    lookup_block_size: usize,
) -> FetchPlan {
    if occupancy as f64 >= capacity as f64 * BACKPRESSURE_RATIO {
        return FetchPlan::Backpressure;
    }

    let fill_target = (capacity as f64 * FILL_RATIO) as i64;
    let desired = (fill_target - occupancy as i64).min(max_batch as i64);
    if desired <= 0 {
        return FetchPlan::Exhausted;
    }

    let desired = desired as usize;
    FetchPlan::Fetch {
        desired,
        block_size: lookup_block_size.min(desired),
    }
}

/// Producer that keeps the shared queue topped up.
pub struct QueueBuilder {
    queue: QueueWriter,
    settings: Arc<Settings>,
    writer: Arc<dyn Writer>,
    writer_capabilities: WriterCapabilities,
    history: DedupCache,
    closed: bool,
    metrics: MetricsCollector,
}

impl QueueBuilder {
    /// Creates a builder feeding `queue` from `writer`.
    ///
    /// The writer's capabilities are read once here.
    pub fn new(queue: QueueWriter, settings: Arc<Settings>, writer: Arc<dyn Writer>) -> Self {
        let writer_capabilities = writer.capabilities();
        let metrics = MetricsCollector::new(&settings.project_name);
        Self {
            queue,
            history: DedupCache::new(settings.prevent_requeuing_time),
            settings,
            writer,
            writer_capabilities,
            closed: false,
            metrics,
        }
    }

    /// Replaces the metrics collector.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs one populate cycle adding at most `max_batch` ids.
    ///
    /// Writer failures are logged and reported as `SkippedExhausted`; they
    /// never abort the caller.
    pub async fn populate(&mut self, max_batch: usize) -> PopulateOutcome {
        let outcome = self.populate_inner(max_batch).await;
        self.metrics.record_populate(outcome.as_str());
        self.metrics.set_queue_depth(self.queue.len());
        outcome
    }

    async fn populate_inner(&mut self, max_batch: usize) -> PopulateOutcome {
        let expired = self.history.sweep(Instant::now());
        if expired > 0 {
            debug!(expired = expired, tracked = self.history.len(), "Swept requeue history");
        }

        let occupancy = self.queue.len();
        let plan = plan_fetch(
            self.queue.capacity(),
            occupancy,
            max_batch,
            self.settings.lookup_block_size,
        );

        let block_size = match plan {
            FetchPlan::Backpressure => {
                debug!(occupancy = occupancy, "Queue above backpressure threshold");
                return PopulateOutcome::SkippedBackpressure;
            }
            FetchPlan::Exhausted => {
                debug!(occupancy = occupancy, "Skipping queue population due to max queue size");
                return PopulateOutcome::SkippedExhausted;
            }
            FetchPlan::Fetch { block_size, .. } => block_size,
        };

        if self.closed {
            self.push_close_sentinels(block_size).await;
            return PopulateOutcome::Closed;
        }

        let request = FetchRequest {
            desired: block_size,
            settings: self
                .writer_capabilities
                .settings
                .then(|| Arc::clone(&self.settings)),
        };
        let mut ids = self.writer.fetch(request);
        let mut successful_adds = 0usize;

        while let Some(next) = ids.next().await {
            let id = match next {
                Ok(Some(id)) => id,
                Ok(None) => {
                    debug!("Writer has nothing available right now");
                    return PopulateOutcome::SkippedExhausted;
                }
                Err(e) => {
                    warn!(error = %e, "Writer failed, skipping this population cycle");
                    return PopulateOutcome::SkippedExhausted;
                }
            };

            match self.add_to_queue(id).await {
                Ok(true) => {
                    successful_adds += 1;
                    if successful_adds >= max_batch {
                        return PopulateOutcome::Filled;
                    }
                }
                Ok(false) => {}
                Err(QueueError::Full(_)) => {
                    debug!("Queue has reached max size");
                    return PopulateOutcome::SkippedBackpressure;
                }
                Err(e) => {
                    warn!(error = %e, "Queue push failed");
                    return PopulateOutcome::SkippedExhausted;
                }
            }
        }

        debug!(added = successful_adds, "Writer stream ended");
        PopulateOutcome::SkippedExhausted
    }

    /// Pushes `id` unless it was queued within the requeue window.
    ///
    /// Returns `Ok(false)` when the id was suppressed. The id is only
    /// recorded once the push succeeds, not before the push is attempted,
    /// so an id rejected by a full queue can be offered again on the next
    /// cycle.
    pub async fn add_to_queue(&mut self, id: ItemId) -> Result<bool, QueueError> {
        if self.history.is_recent(&id, Instant::now()) {
            debug!(item = %id, "Skipping item added too recently");
            return Ok(false);
        }

        self.queue
            .push_item(id.clone(), self.settings.queue_interaction_timeout)
            .await?;
        debug!(item = %id, "Added item to queue");
        self.history.record(id, Instant::now());
        self.metrics.record_enqueued();
        Ok(true)
    }

    /// Marks the builder closed. Later cycles only emit close sentinels.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    /// Returns whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of ids currently inside the requeue window.
    pub fn tracked_ids(&self) -> usize {
        self.history.len()
    }

    async fn push_close_sentinels(&self, count: usize) {
        let mut pushed = 0;
        for _ in 0..count {
            if let Err(e) = self
                .queue
                .push(QueueMessage::Close, self.settings.queue_interaction_timeout)
                .await
            {
                debug!(error = %e, "Stopped pushing close sentinels");
                break;
            }
            pushed += 1;
        }
        debug!(sentinels = pushed, "Pushed close sentinels");
    }
}

impl fmt::Debug for QueueBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("queue_len", &self.queue.len())
            .field("tracked_ids", &self.history.len())
            .field("closed", &self.closed)
            .finish()
    }
}
