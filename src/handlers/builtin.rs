//! Built-in handlers available from the command line.
//!
//! | Reference          | Kind     | Behaviour                                         |
//! |--------------------|----------|---------------------------------------------------|
//! | `builtin:log`      | reader   | logs each item                                    |
//! | `builtin:noop`     | reader   | does nothing                                      |
//! | `exec:<program>`   | reader   | runs `<program> <item>`, non-zero exit is an error |
//! | `builtin:empty`    | writer   | never has anything                                |
//! | `file:<path>`      | writer   | one id per line, re-read every cycle              |
//! | `exec:<program>`   | writer   | runs `<program> <count>`, one id per stdout line  |
//! | `builtin:settings` | context  | the settings snapshot under `"settings"`          |
//! | `builtin:empty`    | context  | an empty context                                  |

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context as _;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info};

use super::{
    AsyncReader, BlockingReader, Context, ContextProvider, FetchRequest, ReaderArgs, Writer,
    WriterStream,
};
use crate::scheduler::{ItemId, Settings};

/// Context key under which [`SettingsContext`] stores the settings.
pub const SETTINGS_KEY: &str = "settings";

/// Logs every item at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReader;

impl BlockingReader for LogReader {
    fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()> {
        info!(worker = %args.worker, item = %item, "Processing item");
        Ok(())
    }
}

/// Accepts every item and does nothing with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReader;

impl BlockingReader for NoopReader {
    fn read(&self, _item: ItemId, _args: ReaderArgs) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Splits `spec` into a program and its leading arguments.
fn split_command(spec: &str) -> anyhow::Result<(String, Vec<String>)> {
    let mut parts = spec.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;
    Ok((program, parts.collect()))
}

/// Runs an external program once per item.
///
/// The item is appended as the last argument. The child is killed if the
/// worker running it is aborted.
#[derive(Debug, Clone)]
pub struct ExecReader {
    program: String,
    args: Vec<String>,
}

impl ExecReader {
    /// Parses `spec` as `program [args...]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is blank.
    pub fn new(spec: &str) -> anyhow::Result<Self> {
        let (program, args) = split_command(spec)?;
        Ok(Self { program, args })
    }
}

#[async_trait]
impl AsyncReader for ExecReader {
    async fn read(&self, item: ItemId, args: ReaderArgs) -> anyhow::Result<()> {
        debug!(worker = %args.worker, item = %item, program = %self.program, "Running reader command");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(item.to_string())
            .env("QUASIQUEUE_WORKER", &*args.worker)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        anyhow::ensure!(
            status.success(),
            "{} exited with {} for item {}",
            self.program,
            status,
            item
        );
        Ok(())
    }
}

/// Reports "nothing available" on every fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWriter;

impl Writer for EmptyWriter {
    fn fetch(&self, _request: FetchRequest) -> WriterStream {
        futures::stream::once(async { Ok(None) }).boxed()
    }
}

/// Reads ids from a file, one per line, on every fetch.
///
/// Blank lines are skipped; integer lines become [`ItemId::Int`].
/// Requeue suppression keeps the same lines from being queued again
/// within the window.
#[derive(Debug, Clone)]
pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Writer for FileWriter {
    fn fetch(&self, _request: FetchRequest) -> WriterStream {
        let path = self.path.clone();
        stream! {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(anyhow::Error::new(e).context(format!("failed to open {}", path.display())));
                    return;
                }
            };

            let mut lines = LinesStream::new(BufReader::new(file).lines());
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if let Some(id) = ItemId::parse(&line) {
                            yield Ok(Some(id));
                        }
                    }
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context(format!("failed to read {}", path.display())));
                        return;
                    }
                }
            }
        }
        .boxed()
    }
}

/// Runs an external program on every fetch and reads ids from its stdout.
///
/// The requested count is appended as the last argument. A non-zero exit
/// status is reported as a writer error after the ids already printed.
#[derive(Debug, Clone)]
pub struct ExecWriter {
    program: String,
    args: Vec<String>,
}

impl ExecWriter {
    /// Parses `spec` as `program [args...]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is blank.
    pub fn new(spec: &str) -> anyhow::Result<Self> {
        let (program, args) = split_command(spec)?;
        Ok(Self { program, args })
    }
}

impl Writer for ExecWriter {
    fn fetch(&self, request: FetchRequest) -> WriterStream {
        let program = self.program.clone();
        let args = self.args.clone();
        stream! {
            let child = Command::new(&program)
                .args(&args)
                .arg(request.desired.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            let mut child = match child {
                Ok(child) => child,
                Err(e) => {
                    yield Err(anyhow::Error::new(e).context(format!("failed to run {}", program)));
                    return;
                }
            };
            let Some(stdout) = child.stdout.take() else {
                yield Err(anyhow::anyhow!("{} has no stdout", program));
                return;
            };

            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if let Some(id) = ItemId::parse(&line) {
                            yield Ok(Some(id));
                        }
                    }
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context(format!("failed to read output of {}", program)));
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    yield Err(anyhow::anyhow!("{} exited with {}", program, status));
                }
                Err(e) => {
                    yield Err(anyhow::Error::new(e).context(format!("failed to wait for {}", program)));
                }
            }
        }
        .boxed()
    }
}

/// Provides a context holding the settings snapshot under [`SETTINGS_KEY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsContext;

#[async_trait]
impl ContextProvider for SettingsContext {
    fn wants_settings(&self) -> bool {
        true
    }

    async fn provide(&self, settings: Option<Arc<Settings>>) -> anyhow::Result<Context> {
        let settings = settings.context("settings were not supplied")?;
        Ok(Context::new().with(SETTINGS_KEY, settings))
    }
}

/// Provides an empty context.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

#[async_trait]
impl ContextProvider for EmptyContext {
    async fn provide(&self, _settings: Option<Arc<Settings>>) -> anyhow::Result<Context> {
        Ok(Context::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> ReaderArgs {
        ReaderArgs {
            worker: Arc::from("worker_000"),
            settings: None,
            context: None,
        }
    }

    fn request(desired: usize) -> FetchRequest {
        FetchRequest {
            desired,
            settings: None,
        }
    }

    #[test]
    fn test_split_command() {
        let (program, args) = split_command("  echo  -n hello ").expect("valid command");
        assert_eq!(program, "echo");
        assert_eq!(args, vec!["-n", "hello"]);
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn test_simple_readers() {
        assert!(LogReader.read(ItemId::from(1), args()).is_ok());
        assert!(NoopReader.read(ItemId::from("a"), args()).is_ok());
    }

    #[tokio::test]
    async fn test_empty_writer() {
        let ids: Vec<_> = EmptyWriter.fetch(request(10)).collect().await;
        assert_eq!(ids.len(), 1);
        assert!(matches!(ids[0], Ok(None)));
    }

    #[tokio::test]
    async fn test_file_writer_reads_ids() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "1\n\n  2 \nalpha\n3").expect("write");

        let writer = FileWriter::new(file.path());
        let ids: Vec<ItemId> = writer
            .fetch(request(10))
            .map(|r| r.expect("read ok").expect("id"))
            .collect()
            .await;
        assert_eq!(
            ids,
            vec![
                ItemId::from(1),
                ItemId::from(2),
                ItemId::from("alpha"),
                ItemId::from(3)
            ]
        );
    }

    #[tokio::test]
    async fn test_file_writer_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = FileWriter::new(dir.path().join("missing.txt"));
        let ids: Vec<_> = writer.fetch(request(10)).collect().await;
        assert_eq!(ids.len(), 1);
        let err = ids[0].as_ref().expect_err("missing file is an error");
        assert!(err.to_string().contains("missing.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_writer_passes_count() {
        let writer = ExecWriter::new("seq 1").expect("valid command");
        let ids: Vec<ItemId> = writer
            .fetch(request(4))
            .map(|r| r.expect("read ok").expect("id"))
            .collect()
            .await;
        assert_eq!(ids, (1..=4).map(ItemId::from).collect::<Vec<_>>());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_writer_reports_failure() {
        let writer = ExecWriter::new("false").expect("valid command");
        let ids: Vec<_> = writer.fetch(request(4)).collect().await;
        assert_eq!(ids.len(), 1);
        assert!(ids[0].is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_reader_exit_status() {
        let ok = ExecReader::new("true").expect("valid command");
        assert!(ok.read(ItemId::from(1), args()).await.is_ok());

        let failing = ExecReader::new("false").expect("valid command");
        let err = failing
            .read(ItemId::from(9), args())
            .await
            .expect_err("non-zero exit is an error");
        assert!(err.to_string().contains("item 9"));
    }

    #[tokio::test]
    async fn test_context_providers() {
        let settings = Arc::new(Settings::default().with_project_name("ctx"));
        let ctx = SettingsContext
            .provide(Some(settings))
            .await
            .expect("context");
        let stored = ctx
            .get::<Arc<Settings>>(SETTINGS_KEY)
            .expect("settings stored");
        assert_eq!(stored.project_name, "ctx");
        assert!(SettingsContext.provide(None).await.is_err());

        let empty = EmptyContext.provide(None).await.expect("context");
        assert!(empty.is_empty());
    }
}
