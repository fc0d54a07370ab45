//! Error types for quasiqueue operations.
//!
//! Defines error types for the major subsystems:
//! - Settings loading and validation
//! - Shared queue interaction
//! - Worker initialization and reader dispatch
//! - Supervisor startup
//! - Handler resolution by name

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::ItemId;

/// Errors that can occur while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors that can occur when pushing to or popping from the shared queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue stayed at capacity for the whole push timeout.
    #[error("Queue is full (waited {0:?})")]
    Full(Duration),

    /// Nothing arrived within the pop timeout.
    #[error("Queue is empty (waited {0:?})")]
    Empty(Duration),

    /// The other side of the queue has been dropped.
    #[error("Queue is disconnected")]
    Disconnected,
}

/// Errors that end a worker abnormally.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The context provider failed during worker startup.
    #[error("Context provider failed: {0}")]
    ContextInit(String),

    /// The reader returned an error for an item.
    #[error("Reader failed on item '{item}': {message}")]
    Reader { item: ItemId, message: String },

    /// The reader panicked or its task was cancelled.
    #[error("Reader task aborted: {0}")]
    ReaderPanicked(String),
}

/// Errors that prevent the supervisor from starting.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Settings failed validation.
    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while resolving handlers by reference.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// References must look like `namespace:name`.
    #[error("Invalid handler reference '{0}': expected 'namespace:name'")]
    InvalidReference(String),

    /// No handler is registered under the reference.
    #[error("No {kind} registered as '{reference}'")]
    NotFound { kind: String, reference: String },

    /// A handler with the same reference is already registered.
    #[error("A {kind} named '{reference}' is already registered")]
    Duplicate { kind: String, reference: String },
}
