//! Callback contracts between the scheduler and the embedding application.
//!
//! Three kinds of user code plug into the scheduler:
//!
//! - **Writer**: produces a lazy stream of item ids to enqueue
//! - **Reader**: processes one item at a time inside a worker
//! - **ContextProvider**: builds a per-worker [`Context`] once at startup
//!
//! Each handler declares up front which optional arguments it wants
//! (settings, context). The declaration is read once when the supervisor
//! is built, never per call.
//!
//! Readers come in two flavours. A [`BlockingReader`] runs on the blocking
//! thread pool and the worker waits for it, so a worker handles one item
//! at a time. An [`AsyncReader`] is spawned as a task, and a worker keeps
//! up to `concurrent_tasks_per_process` of them in flight.

pub mod builtin;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::scheduler::{ItemId, Settings};

/// Lazy sequence of ids returned by a writer.
///
/// - `Ok(Some(id))`: an id to enqueue
/// - `Ok(None)`: nothing is available right now; the cycle stops here
/// - `Err(_)`: the writer failed; the cycle stops and is logged
///
/// The stream may also simply end.
pub type WriterStream = BoxStream<'static, anyhow::Result<Option<ItemId>>>;

/// Per-worker key-value bundle handed to readers.
///
/// Values are arbitrary shareable types (connection pools, HTTP clients,
/// caches) looked up by key and type.
#[derive(Clone, Default)]
pub struct Context {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Builder-style `insert`.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value under `key` if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    /// Returns whether a value exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the context holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}

/// Optional arguments a reader wants passed to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderCapabilities {
    /// Pass the settings snapshot.
    pub settings: bool,
    /// Pass the per-worker context.
    pub context: bool,
}

impl ReaderCapabilities {
    /// Wants neither settings nor context.
    pub const NONE: Self = Self {
        settings: false,
        context: false,
    };

    /// Wants both settings and context.
    pub const ALL: Self = Self {
        settings: true,
        context: true,
    };

    /// Adds the settings argument.
    pub fn with_settings(mut self) -> Self {
        self.settings = true;
        self
    }

    /// Adds the context argument.
    pub fn with_context(mut self) -> Self {
        self.context = true;
        self
    }
}

/// Arguments passed to a reader alongside the item.
///
/// `settings` and `context` are only populated when the reader declared
/// them in its [`ReaderCapabilities`].
#[derive(Debug, Clone)]
pub struct ReaderArgs {
    /// Name of the worker dispatching the item.
    pub worker: Arc<str>,
    /// Settings snapshot, if requested.
    pub settings: Option<Arc<Settings>>,
    /// Worker context, if requested.
    pub context: Option<Arc<Context>>,
}

/// A reader executed on the blocking thread pool, one item at a time.
pub trait BlockingReader: Send + Sync + 'static {
    /// Optional arguments this reader wants.
    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::NONE
    }

    /// Processes one item. Returning an error ends the worker.
    fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()>;
}

/// A reader executed as a concurrent task within its worker.
#[async_trait]
pub trait AsyncReader: Send + Sync + 'static {
    /// Optional arguments this reader wants.
    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::NONE
    }

    /// Processes one item. Returning an error ends the worker.
    async fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()>;
}

/// A reader and its execution mode.
#[derive(Clone)]
pub enum Reader {
    /// Serial execution on the blocking pool.
    Blocking(Arc<dyn BlockingReader>),
    /// Bounded concurrent execution as async tasks.
    Concurrent(Arc<dyn AsyncReader>),
}

impl Reader {
    /// Wraps a blocking reader.
    pub fn blocking(reader: impl BlockingReader) -> Self {
        Reader::Blocking(Arc::new(reader))
    }

    /// Wraps an async reader.
    pub fn concurrent(reader: impl AsyncReader) -> Self {
        Reader::Concurrent(Arc::new(reader))
    }

    /// Optional arguments the wrapped reader wants.
    pub fn capabilities(&self) -> ReaderCapabilities {
        match self {
            Reader::Blocking(r) => r.capabilities(),
            Reader::Concurrent(r) => r.capabilities(),
        }
    }

    /// Returns true for concurrently executed readers.
    pub fn is_concurrent(&self) -> bool {
        matches!(self, Reader::Concurrent(_))
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_concurrent() {
            "Concurrent"
        } else {
            "Blocking"
        };
        f.debug_struct("Reader")
            .field("mode", &mode)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Optional arguments a writer wants passed to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterCapabilities {
    /// Pass the settings snapshot.
    pub settings: bool,
}

/// Arguments for one writer fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Number of ids the builder would like; a hint, not a limit.
    pub desired: usize,
    /// Settings snapshot, if requested.
    pub settings: Option<Arc<Settings>>,
}

/// Source of item ids.
pub trait Writer: Send + Sync + 'static {
    /// Optional arguments this writer wants.
    fn capabilities(&self) -> WriterCapabilities {
        WriterCapabilities::default()
    }

    /// Starts a lazy fetch of roughly `request.desired` ids.
    fn fetch(&self, request: FetchRequest) -> WriterStream;
}

/// Builds the per-worker context at worker startup.
#[async_trait]
pub trait ContextProvider: Send + Sync + 'static {
    /// Whether `provide` wants the settings snapshot.
    fn wants_settings(&self) -> bool {
        false
    }

    /// Builds a fresh context. An error prevents the worker from starting.
    async fn provide(&self, settings: Option<Arc<Settings>>) -> anyhow::Result<Context>;
}

// ── Closure adapters ─────────────────────────────────────────────────

struct FnBlockingReader<F> {
    capabilities: ReaderCapabilities,
    f: F,
}

impl<F> BlockingReader for FnBlockingReader<F>
where
    F: Fn(ItemId, ReaderArgs) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn capabilities(&self) -> ReaderCapabilities {
        self.capabilities
    }

    fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()> {
        (self.f)(item, args)
    }
}

struct FnAsyncReader<F> {
    capabilities: ReaderCapabilities,
    f: F,
}

#[async_trait]
impl<F, Fut> AsyncReader for FnAsyncReader<F>
where
    F: Fn(ItemId, ReaderArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn capabilities(&self) -> ReaderCapabilities {
        self.capabilities
    }

    async fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()> {
        (self.f)(item, args).await
    }
}

struct FnWriter<F> {
    capabilities: WriterCapabilities,
    f: F,
}

impl<F> Writer for FnWriter<F>
where
    F: Fn(FetchRequest) -> WriterStream + Send + Sync + 'static,
{
    fn capabilities(&self) -> WriterCapabilities {
        self.capabilities
    }

    fn fetch(&self, request: FetchRequest) -> WriterStream {
        (self.f)(request)
    }
}

struct FnContextProvider<F> {
    wants_settings: bool,
    f: F,
}

#[async_trait]
impl<F, Fut> ContextProvider for FnContextProvider<F>
where
    F: Fn(Option<Arc<Settings>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Context>> + Send + 'static,
{
    fn wants_settings(&self) -> bool {
        self.wants_settings
    }

    async fn provide(&self, settings: Option<Arc<Settings>>) -> anyhow::Result<Context> {
        (self.f)(settings).await
    }
}

/// Builds a blocking [`Reader`] from a closure.
pub fn blocking_reader_fn<F>(capabilities: ReaderCapabilities, f: F) -> Reader
where
    F: Fn(ItemId, ReaderArgs) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Reader::blocking(FnBlockingReader { capabilities, f })
}

/// Builds a concurrent [`Reader`] from an async closure.
pub fn async_reader_fn<F, Fut>(capabilities: ReaderCapabilities, f: F) -> Reader
where
    F: Fn(ItemId, ReaderArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Reader::concurrent(FnAsyncReader { capabilities, f })
}

/// Builds a [`Writer`] from a closure returning a stream.
pub fn writer_fn<F>(capabilities: WriterCapabilities, f: F) -> Arc<dyn Writer>
where
    F: Fn(FetchRequest) -> WriterStream + Send + Sync + 'static,
{
    Arc::new(FnWriter { capabilities, f })
}

/// Builds a [`ContextProvider`] from a synchronous closure.
pub fn context_fn<F>(wants_settings: bool, f: F) -> Arc<dyn ContextProvider>
where
    F: Fn(Option<Arc<Settings>>) -> anyhow::Result<Context> + Send + Sync + 'static,
{
    Arc::new(FnContextProvider {
        wants_settings,
        f: move |settings| std::future::ready(f(settings)),
    })
}

/// Builds a [`ContextProvider`] from an async closure.
pub fn async_context_fn<F, Fut>(wants_settings: bool, f: F) -> Arc<dyn ContextProvider>
where
    F: Fn(Option<Arc<Settings>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Context>> + Send + 'static,
{
    Arc::new(FnContextProvider { wants_settings, f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_context_typed_lookup() {
        let ctx = Context::new()
            .with("pool_size", 8usize)
            .with("name", "crawler".to_string());

        assert_eq!(ctx.get::<usize>("pool_size"), Some(&8));
        assert_eq!(ctx.get::<String>("name").map(String::as_str), Some("crawler"));
        // Wrong type or missing key both yield None.
        assert_eq!(ctx.get::<u32>("pool_size"), None);
        assert_eq!(ctx.get::<usize>("missing"), None);
        assert!(ctx.contains_key("name"));
        assert_eq!(ctx.len(), 2);
        assert_eq!(format!("{:?}", ctx), r#"Context { keys: ["name", "pool_size"] }"#);
    }

    #[test]
    fn test_capabilities_builders() {
        assert_eq!(ReaderCapabilities::default(), ReaderCapabilities::NONE);
        assert_eq!(
            ReaderCapabilities::NONE.with_settings().with_context(),
            ReaderCapabilities::ALL
        );
    }

    #[test]
    fn test_blocking_reader_fn() {
        let reader = blocking_reader_fn(ReaderCapabilities::NONE.with_context(), |item, _| {
            anyhow::ensure!(item != ItemId::from(13), "unlucky");
            Ok(())
        });
        assert!(!reader.is_concurrent());
        assert_eq!(reader.capabilities(), ReaderCapabilities::NONE.with_context());

        let Reader::Blocking(inner) = &reader else {
            panic!("expected a blocking reader");
        };
        let args = ReaderArgs {
            worker: Arc::from("worker_000"),
            settings: None,
            context: None,
        };
        assert!(inner.read(ItemId::from(1), args.clone()).is_ok());
        assert!(inner.read(ItemId::from(13), args).is_err());
    }

    #[tokio::test]
    async fn test_async_adapters() {
        let reader = async_reader_fn(ReaderCapabilities::ALL, |_, args| async move {
            anyhow::ensure!(args.settings.is_some(), "settings missing");
            Ok(())
        });
        assert!(reader.is_concurrent());

        let provider = context_fn(true, |settings| {
            Ok(Context::new().with("workers", settings.map(|s| s.num_processes)))
        });
        assert!(provider.wants_settings());
        let ctx = provider
            .provide(Some(Arc::new(Settings::default())))
            .await
            .expect("context should build");
        assert_eq!(ctx.get::<Option<usize>>("workers"), Some(&Some(2)));

        let writer = writer_fn(WriterCapabilities::default(), |request| {
            futures::stream::iter((0..request.desired as i64).map(|i| Ok(Some(ItemId::from(i)))))
                .boxed()
        });
        let ids: Vec<_> = writer
            .fetch(FetchRequest {
                desired: 3,
                settings: None,
            })
            .collect()
            .await;
        assert_eq!(ids.len(), 3);
    }
}
