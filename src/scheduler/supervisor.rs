//! Worker pool supervision.
//!
//! The [`Supervisor`] keeps `num_processes` workers alive, drives the
//! [`QueueBuilder`] on a steady cadence and owns the shutdown protocol.
//!
//! # Main loop
//!
//! 1. Reap finished workers and log how they ended.
//! 2. Launch workers until the pool is back at its target size.
//! 3. Run one populate cycle.
//! 4. Sleep `full_queue_sleep_time` after a skipped cycle, or a short
//!    fixed pause otherwise.
//!
//! # Shutdown
//!
//! Once the shutdown signal is set the loop stops. For a graceful
//! shutdown the supervisor polls the pool every 50ms for up to
//! `graceful_shutdown_timeout`; whatever is still running afterwards is
//! aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::builder::{PopulateOutcome, QueueBuilder, DEFAULT_MAX_BATCH};
use super::queue::bounded;
use super::settings::Settings;
use super::shutdown::{LivenessGuard, ShutdownKind, ShutdownSignal, ShutdownState};
use super::worker::{WorkerExit, WorkerLoop, WorkerTemplate};
use crate::error::{SupervisorError, WorkerError};
use crate::handlers::{ContextProvider, Reader, Writer};
use crate::metrics::MetricsCollector;

/// Pause after a populate cycle that added work or pushed sentinels.
const ACTIVE_PAUSE: Duration = Duration::from_millis(50);

/// How often the pool is checked while waiting for a graceful exit.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Populate cycle counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateCounts {
    pub filled: u64,
    pub skipped_backpressure: u64,
    pub skipped_exhausted: u64,
    pub closed: u64,
}

impl PopulateCounts {
    /// Counts one cycle.
    pub fn record(&mut self, outcome: PopulateOutcome) {
        match outcome {
            PopulateOutcome::Filled => self.filled += 1,
            PopulateOutcome::SkippedBackpressure => self.skipped_backpressure += 1,
            PopulateOutcome::SkippedExhausted => self.skipped_exhausted += 1,
            PopulateOutcome::Closed => self.closed += 1,
        }
    }

    /// Total cycles.
    pub fn total(&self) -> u64 {
        self.filled + self.skipped_backpressure + self.skipped_exhausted + self.closed
    }
}

/// What happened during one supervisor run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub queue: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Workers spawned over the whole run, replacements included.
    pub workers_launched: usize,
    /// Workers that had to be aborted during shutdown.
    pub workers_killed: usize,
    pub populate: PopulateCounts,
}

impl RunSummary {
    /// Wall-clock run time.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Cloneable control handle for a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shutdown: ShutdownSignal,
    close_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SupervisorHandle {
    /// Requests a graceful shutdown.
    ///
    /// Returns `false` if a shutdown was already under way.
    pub fn shutdown(&self) -> bool {
        let advanced = self.shutdown.trigger(ShutdownKind::Graceful);
        self.wake.notify_one();
        advanced
    }

    /// Requests an immediate shutdown: workers are aborted without waiting.
    pub fn kill(&self) -> bool {
        let advanced = self.shutdown.trigger(ShutdownKind::Immediate);
        self.wake.notify_one();
        advanced
    }

    /// Stops fetching new work and lets the pool drain.
    ///
    /// The queue builder switches to emitting close sentinels, exited
    /// workers are no longer replaced, and the run ends once the pool is
    /// empty.
    pub fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Returns whether a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Returns whether `close` has been called.
    pub fn is_closing(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

/// A tracked worker task.
struct WorkerHandle {
    name: Arc<str>,
    handle: JoinHandle<Result<WorkerExit, WorkerError>>,
}

/// Keeps the worker pool at its target size and the queue topped up.
pub struct Supervisor {
    settings: Arc<Settings>,
    builder: QueueBuilder,
    template: WorkerTemplate,
    workers: Vec<WorkerHandle>,
    generation: usize,
    handle: SupervisorHandle,
    liveness: LivenessGuard,
    metrics: MetricsCollector,
    workers_launched: usize,
    workers_killed: usize,
    populate: PopulateCounts,
}

impl Supervisor {
    /// Creates a supervisor for `reader` and `writer`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Scheduler settings, validated here
    /// * `reader` - Processes each dequeued item inside a worker
    /// * `writer` - Supplies ids to enqueue
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Config` if the settings are invalid.
    pub fn new(
        settings: Settings,
        reader: Reader,
        writer: Arc<dyn Writer>,
    ) -> Result<Self, SupervisorError> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let metrics = MetricsCollector::new(&settings.project_name);

        let (queue_writer, queue_reader) = bounded(settings.max_queue_size);
        let builder = QueueBuilder::new(queue_writer, Arc::clone(&settings), writer)
            .with_metrics(metrics.clone());

        let shutdown = ShutdownSignal::new();
        let template = WorkerTemplate::new(
            queue_reader,
            reader,
            None,
            Arc::clone(&settings),
            shutdown.clone(),
        );

        Ok(Self {
            settings,
            builder,
            template,
            workers: Vec::new(),
            generation: 0,
            handle: SupervisorHandle {
                shutdown,
                close_requested: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
            },
            liveness: LivenessGuard::new(),
            metrics,
            workers_launched: 0,
            workers_killed: 0,
            populate: PopulateCounts::default(),
        })
    }

    /// Sets the provider that builds each worker's context.
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.template.context_provider = Some(provider);
        self
    }

    /// Returns a handle for controlling the run from elsewhere.
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// The settings snapshot shared with every worker.
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Runs until a shutdown is requested or a closed pool has drained.
    pub async fn run(mut self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            queue = %self.settings.project_name,
            num_processes = self.settings.num_processes,
            max_queue_size = self.settings.max_queue_size,
            "Starting supervisor"
        );

        let mut closing = false;
        loop {
            if self.handle.shutdown.is_set() {
                break;
            }

            if !closing && self.handle.is_closing() {
                closing = true;
                self.builder.close();
                info!("Queue closed, letting workers drain");
            }

            self.reap_workers().await;

            if closing {
                if self.workers.is_empty() {
                    info!("All workers drained");
                    break;
                }
            } else {
                while self.workers.len() < self.settings.num_processes {
                    self.launch_worker();
                }
            }
            self.metrics.set_active_workers(self.workers.len());

            // A writer may stall between yields; a shutdown drops its stream.
            let outcome = tokio::select! {
                outcome = self.builder.populate(DEFAULT_MAX_BATCH) => outcome,
                _ = self.handle.shutdown.wait() => {
                    info!("Shutdown requested during populate, dropping writer stream");
                    break;
                }
            };
            self.populate.record(outcome);
            let pause = if outcome.is_skipped() {
                self.settings.full_queue_sleep_time
            } else {
                ACTIVE_PAUSE
            };
            debug!(outcome = %outcome, pause = ?pause, "Populate cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.handle.wake.notified() => {}
                _ = self.handle.shutdown.wait() => {}
            }
        }

        self.stop_workers().await;

        let summary = RunSummary {
            run_id,
            queue: self.settings.project_name.clone(),
            started_at,
            finished_at: Utc::now(),
            workers_launched: self.workers_launched,
            workers_killed: self.workers_killed,
            populate: self.populate,
        };
        info!(
            run_id = %summary.run_id,
            workers_launched = summary.workers_launched,
            workers_killed = summary.workers_killed,
            duration_ms = summary.duration().num_milliseconds(),
            populate_cycles = summary.populate.total(),
            "Supervisor stopped"
        );
        summary
    }

    fn launch_worker(&mut self) {
        let name: Arc<str> = Arc::from(format!("worker_{:03}", self.generation));
        self.generation += 1;

        debug!(worker = %name, "Launching worker");
        let worker = WorkerLoop::new(
            Arc::clone(&name),
            self.template.clone(),
            self.liveness.probe(),
        );
        let handle = tokio::spawn(worker.run());

        self.workers.push(WorkerHandle { name, handle });
        self.workers_launched += 1;
        self.metrics.record_worker_launch();
    }

    /// Removes finished workers from the tracked set.
    async fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|worker| worker.handle.is_finished());
        self.workers = running;

        for worker in finished {
            let reason = match worker.handle.await {
                Ok(Ok(exit)) => {
                    debug!(worker = %worker.name, reason = %exit, "Worker exited");
                    exit.as_str()
                }
                Ok(Err(e)) => {
                    error!(worker = %worker.name, error = %e, "Worker failed, replacing it");
                    "failed"
                }
                Err(e) if e.is_panic() => {
                    error!(worker = %worker.name, error = %e, "Worker panicked, replacing it");
                    "panicked"
                }
                Err(_) => "killed",
            };
            self.metrics.record_worker_exit(reason);
        }
    }

    async fn stop_workers(&mut self) {
        // A drained pool ends the loop without a signal; treat it as graceful.
        self.handle.shutdown.trigger(ShutdownKind::Graceful);

        if self.handle.shutdown.state() == ShutdownState::Graceful && !self.workers.is_empty() {
            let timeout = self.settings.graceful_shutdown_timeout;
            info!(
                workers = self.workers.len(),
                timeout = ?timeout,
                "Waiting for workers to exit"
            );

            let deadline = Instant::now() + timeout;
            loop {
                self.reap_workers().await;
                if self.workers.is_empty()
                    || Instant::now() >= deadline
                    || self.handle.shutdown.state() == ShutdownState::Immediate
                {
                    break;
                }
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
        }

        for worker in self.workers.drain(..) {
            warn!(worker = %worker.name, "Terminating worker");
            worker.handle.abort();
            if let Err(e) = worker.handle.await {
                if e.is_panic() {
                    error!(worker = %worker.name, error = %e, "Worker panicked during shutdown");
                }
            }
            self.workers_killed += 1;
            self.metrics.record_worker_exit("killed");
        }
        self.metrics.set_active_workers(0);
    }
}
