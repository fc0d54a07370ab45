//! Worker-pool job scheduler.
//!
//! This module provides the core of quasiqueue:
//!
//! - **QueueBuilder**: refills the shared queue from a writer, with
//!   occupancy-based backpressure and requeue suppression
//! - **Supervisor**: keeps the worker pool at its target size and owns
//!   the shutdown protocol
//! - **WorkerLoop**: pops items and dispatches them to the reader, one at
//!   a time or as bounded concurrent tasks
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │    Writer    │
//!                      └──────┬───────┘
//!                             │ ids
//!                      ┌──────▼───────┐
//!                      │ QueueBuilder │  (driven by the Supervisor)
//!                      └──────┬───────┘
//!                             │
//!                      ┌──────▼───────┐
//!                      │ Shared queue │  bounded, max_queue_size
//!                      └──────┬───────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!   ┌────────────┐      ┌────────────┐      ┌────────────┐
//!   │ worker_000 │      │ worker_001 │      │ worker_NNN │ ──► Reader
//!   └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use quasiqueue::handlers::{blocking_reader_fn, writer_fn, ReaderCapabilities, WriterCapabilities};
//! use quasiqueue::scheduler::{listen_for_signals, ItemId, Settings, Supervisor};
//!
//! let reader = blocking_reader_fn(ReaderCapabilities::NONE, |item, _| {
//!     println!("processing {item}");
//!     Ok(())
//! });
//! let writer = writer_fn(WriterCapabilities::default(), |request| {
//!     futures::stream::iter((0..request.desired as i64).map(|i| Ok(Some(ItemId::from(i))))).boxed()
//! });
//!
//! let supervisor = Supervisor::new(Settings::for_queue("example")?, reader, writer)?;
//! listen_for_signals(supervisor.handle());
//! let summary = supervisor.run().await;
//! ```

pub mod builder;
pub mod dedup;
pub mod job;
pub mod queue;
pub mod settings;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use builder::{plan_fetch, FetchPlan, PopulateOutcome, QueueBuilder, DEFAULT_MAX_BATCH};
pub use dedup::DedupCache;
pub use job::{ItemId, QueueMessage};
pub use queue::{bounded, QueueReader, QueueWriter};
pub use settings::{queue_env_prefix, Settings, ENV_PREFIX};
pub use shutdown::{
    listen_for_signals, LivenessGuard, LivenessProbe, ShutdownKind, ShutdownSignal,
    ShutdownState,
};
pub use supervisor::{PopulateCounts, RunSummary, Supervisor, SupervisorHandle};
pub use worker::{WorkerExit, WorkerLoop, WorkerState, WorkerTemplate};
