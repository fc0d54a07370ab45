//! Per-worker dispatch loop.
//!
//! Each worker is a tokio task that pops items from the shared queue and
//! hands them to the reader. A worker moves through four states:
//!
//! ```text
//! Init ──► Running ──► Draining ──► Terminated
//! ```
//!
//! `Init` builds the worker's [`Context`] once. `Running` pops and
//! dispatches until a close sentinel, a shutdown request, the job quota or
//! the loss of the supervisor ends it. `Draining` waits for in-flight
//! concurrent reader tasks.
//!
//! Reader failures are not caught: an error or panic ends the worker, and
//! the supervisor replaces it on its next pass. The failing item is not
//! retried.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::job::{ItemId, QueueMessage};
use super::queue::QueueReader;
use super::settings::Settings;
use super::shutdown::{LivenessProbe, ShutdownSignal};
use crate::error::{QueueError, WorkerError};
use crate::handlers::{Context, ContextProvider, Reader, ReaderArgs, ReaderCapabilities};
use crate::metrics::MetricsCollector;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Running,
    Draining,
    Terminated,
}

/// Why a worker left the `Running` state without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerExit {
    /// Popped a close sentinel.
    CloseSentinel,
    /// The shutdown signal was set.
    Shutdown,
    /// Processed `max_jobs_per_process` items.
    JobQuota,
    /// The supervisor is gone.
    Orphaned,
}

impl WorkerExit {
    /// Stable lowercase name, used for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerExit::CloseSentinel => "close",
            WorkerExit::Shutdown => "shutdown",
            WorkerExit::JobQuota => "quota",
            WorkerExit::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a worker needs, shared by all workers of one supervisor.
#[derive(Clone)]
pub struct WorkerTemplate {
    pub queue: QueueReader,
    pub reader: Reader,
    pub capabilities: ReaderCapabilities,
    pub context_provider: Option<Arc<dyn ContextProvider>>,
    pub settings: Arc<Settings>,
    pub shutdown: ShutdownSignal,
    pub metrics: MetricsCollector,
}

impl WorkerTemplate {
    /// Creates a template. The reader's capabilities are read once here.
    pub fn new(
        queue: QueueReader,
        reader: Reader,
        context_provider: Option<Arc<dyn ContextProvider>>,
        settings: Arc<Settings>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let capabilities = reader.capabilities();
        let metrics = MetricsCollector::new(&settings.project_name);
        Self {
            queue,
            reader,
            capabilities,
            context_provider,
            settings,
            shutdown,
            metrics,
        }
    }
}

impl fmt::Debug for WorkerTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTemplate")
            .field("reader", &self.reader)
            .field("has_context_provider", &self.context_provider.is_some())
            .finish()
    }
}

/// One worker's dispatch loop.
pub struct WorkerLoop {
    name: Arc<str>,
    template: WorkerTemplate,
    parent: LivenessProbe,
    state: WorkerState,
    processed: usize,
}

impl WorkerLoop {
    /// Creates a worker named `name` that stops once `parent` is gone.
    pub fn new(name: impl Into<Arc<str>>, template: WorkerTemplate, parent: LivenessProbe) -> Self {
        Self {
            name: name.into(),
            template,
            parent,
            state: WorkerState::Init,
            processed: 0,
        }
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the worker to completion.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if the context provider fails or a reader
    /// call fails or panics.
    pub async fn run(mut self) -> Result<WorkerExit, WorkerError> {
        info!(worker = %self.name, "Worker started");

        let context = self.build_context().await?;
        let args = self.reader_args(context);

        self.transition(WorkerState::Running);
        let mut tasks = JoinSet::new();
        let exit = self.dispatch_loop(&args, &mut tasks).await;

        self.transition(WorkerState::Draining);
        let drained = match &exit {
            // Nobody is left to wait for; dropping the set aborts the tasks.
            Ok(WorkerExit::Orphaned) => Ok(()),
            Ok(_) => self.drain(&mut tasks).await,
            Err(_) => Ok(()),
        };

        self.transition(WorkerState::Terminated);
        let exit = exit.and_then(|exit| drained.map(|()| exit));
        match &exit {
            Ok(reason) => info!(
                worker = %self.name,
                reason = %reason,
                processed = self.processed,
                "Worker stopped"
            ),
            Err(e) => warn!(
                worker = %self.name,
                error = %e,
                processed = self.processed,
                "Worker failed"
            ),
        }
        exit
    }

    async fn build_context(&self) -> Result<Context, WorkerError> {
        let Some(provider) = &self.template.context_provider else {
            return Ok(Context::new());
        };

        let settings = provider
            .wants_settings()
            .then(|| Arc::clone(&self.template.settings));
        provider
            .provide(settings)
            .await
            .map_err(|e| WorkerError::ContextInit(format!("{:#}", e)))
    }

    fn reader_args(&self, context: Context) -> ReaderArgs {
        let capabilities = self.template.capabilities;
        ReaderArgs {
            worker: Arc::clone(&self.name),
            settings: capabilities
                .settings
                .then(|| Arc::clone(&self.template.settings)),
            context: capabilities.context.then(|| Arc::new(context)),
        }
    }

    async fn dispatch_loop(
        &mut self,
        args: &ReaderArgs,
        tasks: &mut JoinSet<Result<(), WorkerError>>,
    ) -> Result<WorkerExit, WorkerError> {
        let settings = Arc::clone(&self.template.settings);
        let slots = Arc::new(Semaphore::new(settings.concurrent_tasks_per_process));

        loop {
            if self.template.shutdown.is_set() {
                return Ok(WorkerExit::Shutdown);
            }
            if !self.parent.is_alive() {
                return Ok(WorkerExit::Orphaned);
            }
            while let Some(finished) = tasks.try_join_next() {
                task_result(finished)?;
            }

            let item = match self.template.queue.pop(settings.queue_interaction_timeout).await {
                Ok(QueueMessage::Item(item)) => item,
                Ok(QueueMessage::Close) => {
                    debug!(worker = %self.name, "Received close sentinel");
                    return Ok(WorkerExit::CloseSentinel);
                }
                Err(QueueError::Disconnected) => return Ok(WorkerExit::Orphaned),
                Err(_) => {
                    self.idle(settings.empty_queue_sleep_time).await;
                    continue;
                }
            };

            debug!(worker = %self.name, item = %item, "Dispatching item");
            self.template.metrics.record_dispatched();

            match &self.template.reader {
                Reader::Blocking(reader) => {
                    let reader = Arc::clone(reader);
                    let args = args.clone();
                    let id = item.clone();
                    match tokio::task::spawn_blocking(move || reader.read(id, args)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(reader_error(item, e)),
                        Err(e) => return Err(WorkerError::ReaderPanicked(e.to_string())),
                    }
                }
                Reader::Concurrent(reader) => {
                    let permit = tokio::select! {
                        permit = Arc::clone(&slots).acquire_owned() => permit,
                        _ = self.template.shutdown.wait() => {
                            debug!(worker = %self.name, item = %item, "Shutdown while waiting for a task slot");
                            return Ok(WorkerExit::Shutdown);
                        }
                    };
                    let Ok(permit) = permit else {
                        return Ok(WorkerExit::Shutdown);
                    };

                    let reader = Arc::clone(reader);
                    let args = args.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        reader
                            .read(item.clone(), args)
                            .await
                            .map_err(|e| reader_error(item, e))
                    });
                }
            }

            self.processed += 1;
            if let Some(quota) = settings.max_jobs_per_process {
                if self.processed >= quota {
                    info!(worker = %self.name, quota = quota, "Reached job quota, retiring");
                    return Ok(WorkerExit::JobQuota);
                }
            }
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<Result<(), WorkerError>>) -> Result<(), WorkerError> {
        if !tasks.is_empty() {
            debug!(worker = %self.name, in_flight = tasks.len(), "Waiting for in-flight tasks");
        }

        let mut first_error = None;
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = task_result(finished) {
                warn!(worker = %self.name, error = %e, "Reader task failed while draining");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn idle(&self, duration: std::time::Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.template.shutdown.wait() => {}
        }
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(worker = %self.name, from = ?self.state, to = ?next, "Worker state change");
        self.state = next;
    }
}

fn reader_error(item: ItemId, e: anyhow::Error) -> WorkerError {
    WorkerError::Reader {
        item,
        message: format!("{:#}", e),
    }
}

fn task_result(finished: Result<Result<(), WorkerError>, JoinError>) -> Result<(), WorkerError> {
    match finished {
        Ok(result) => result,
        Err(e) => Err(WorkerError::ReaderPanicked(e.to_string())),
    }
}
