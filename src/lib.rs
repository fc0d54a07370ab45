//! quasiqueue: a worker-pool job scheduler.
//!
//! A supervisor keeps a bounded queue topped up from a writer and runs a
//! pool of workers that hand each queued item to a reader. Population is
//! throttled by queue occupancy, recently queued ids are not queued again
//! within a configurable window, and workers retire themselves after a job
//! quota.

pub mod cli;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types
pub use error::{ConfigError, QueueError, RegistryError, SupervisorError, WorkerError};
pub use handlers::{Context, Reader, ReaderArgs, ReaderCapabilities, Writer, WriterStream};
pub use registry::HandlerRegistry;
pub use scheduler::{ItemId, RunSummary, Settings, Supervisor, SupervisorHandle};
