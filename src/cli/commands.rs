//! CLI command definitions for quasiqueue.
//!
//! Handlers are passed by reference (`namespace:name`) and resolved
//! through a [`HandlerRegistry`].

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use crate::metrics::{export_metrics, init_metrics};
use crate::registry::HandlerRegistry;
use crate::scheduler::{listen_for_signals, Settings, Supervisor};

/// Queue name used when `--name` is not given.
const DEFAULT_QUEUE_NAME: &str = "queue";

/// Log level used when `--log-level` is not given.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Worker-pool job scheduler.
#[derive(Parser, Debug)]
#[command(name = "quasiqueue")]
#[command(about = "Run a worker pool that drains a queue refilled from a writer")]
#[command(version)]
#[command(
    long_about = "quasiqueue keeps a bounded queue topped up from a writer and drains it with a pool of workers.\n\nExample usage:\n  quasiqueue run builtin:log file:./ids.txt --name crawl\n  QUASIQUEUE_CRAWL_NUM_PROCESSES=8 quasiqueue run exec:./process.sh exec:./list-ids.sh --name crawl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = DEFAULT_LOG_LEVEL, global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a queue until interrupted.
    ///
    /// SIGINT or SIGTERM starts a graceful shutdown; a second signal
    /// terminates the remaining workers immediately.
    Run(RunArgs),

    /// Print the resolved settings for a queue as JSON.
    Settings(SettingsArgs),

    /// Print the version.
    Version,
}

/// Arguments for `quasiqueue run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Reader reference, e.g. `builtin:log` or `exec:./process.sh`.
    pub reader: String,

    /// Writer reference, e.g. `file:./ids.txt` or `exec:./list-ids.sh`.
    pub writer: String,

    /// Optional context provider reference, e.g. `builtin:settings`.
    pub context: Option<String>,

    /// Queue name; selects `QUASIQUEUE_<NAME>_*` settings.
    #[arg(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
    pub name: String,

    /// Print Prometheus metrics when the run ends.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `quasiqueue settings`.
#[derive(Parser, Debug)]
pub struct SettingsArgs {
    /// Queue name; selects `QUASIQUEUE_<NAME>_*` settings.
    #[arg(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
    pub name: String,
}

/// Parse CLI arguments without running any command.
///
/// Useful for initializing logging before running the command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Returns the log filter to use when `RUST_LOG` is not set.
///
/// An explicit `--log-level` wins; otherwise a queue with `debug` enabled
/// logs at `debug`.
pub fn default_log_filter(cli: &Cli) -> String {
    if cli.log_level != DEFAULT_LOG_LEVEL {
        return cli.log_level.clone();
    }

    let name = match &cli.command {
        Commands::Run(args) => Some(args.name.as_str()),
        Commands::Settings(args) => Some(args.name.as_str()),
        Commands::Version => None,
    };
    let debug = name
        .and_then(|name| Settings::for_queue(name).ok())
        .is_some_and(|settings| settings.debug);

    if debug {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    }
}

/// Run the CLI by parsing arguments and executing the command.
///
/// This is a convenience function that parses CLI args and runs the command.
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments and the built-in handlers.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    run_with_registry(cli, HandlerRegistry::with_builtins()).await
}

/// Run the CLI with the parsed arguments, resolving handlers from
/// `registry`.
///
/// Applications embedding quasiqueue register their own handlers and call
/// this from their `main`.
pub async fn run_with_registry(cli: Cli, registry: HandlerRegistry) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_queue_command(args, &registry).await,
        Commands::Settings(args) => run_settings_command(args),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_queue_command(args: RunArgs, registry: &HandlerRegistry) -> anyhow::Result<()> {
    let settings = Settings::for_queue(&args.name)
        .with_context(|| format!("Failed to load settings for queue '{}'", args.name))?;

    let reader = registry.reader(&args.reader)?;
    let writer = registry.writer(&args.writer)?;
    let context = args
        .context
        .as_deref()
        .filter(|reference| !reference.is_empty())
        .map(|reference| registry.context(reference))
        .transpose()?;

    init_metrics().context("Failed to initialize metrics")?;

    let mut supervisor = Supervisor::new(settings, reader, writer)?;
    if let Some(provider) = context {
        supervisor = supervisor.with_context_provider(provider);
    }

    info!(
        queue = %args.name,
        reader = %args.reader,
        writer = %args.writer,
        context = args.context.as_deref().unwrap_or("none"),
        "Starting queue"
    );

    let signals = listen_for_signals(supervisor.handle());
    let summary = supervisor.run().await;
    signals.abort();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if args.print_metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}

fn run_settings_command(args: SettingsArgs) -> anyhow::Result<()> {
    let settings = Settings::for_queue(&args.name)
        .with_context(|| format!("Failed to load settings for queue '{}'", args.name))?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "quasiqueue",
            "run",
            "builtin:log",
            "file:ids.txt",
            "builtin:settings",
            "--name",
            "crawl",
            "--print-metrics",
        ])
        .expect("valid arguments");

        assert_eq!(cli.log_level, "info");
        let Commands::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.reader, "builtin:log");
        assert_eq!(args.writer, "file:ids.txt");
        assert_eq!(args.context.as_deref(), Some("builtin:settings"));
        assert_eq!(args.name, "crawl");
        assert!(args.print_metrics);
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["quasiqueue", "run", "builtin:noop", "builtin:empty"])
            .expect("valid arguments");
        let Commands::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.name, DEFAULT_QUEUE_NAME);
        assert!(args.context.is_none());
        assert!(!args.print_metrics);

        assert!(Cli::try_parse_from(["quasiqueue", "run", "builtin:noop"]).is_err());
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["quasiqueue", "version", "--log-level", "warn"])
            .expect("valid arguments");
        assert!(matches!(cli.command, Commands::Version));
        assert_eq!(default_log_filter(&cli), "warn");
    }

    #[tokio::test]
    async fn test_unknown_handler_fails_before_running() {
        let cli = Cli::try_parse_from([
            "quasiqueue",
            "run",
            "builtin:missing",
            "builtin:empty",
            "--name",
            "cli-test-unknown",
        ])
        .expect("valid arguments");

        let err = run_with_registry(cli, HandlerRegistry::with_builtins())
            .await
            .expect_err("unknown reader should fail");
        assert!(err.to_string().contains("builtin:missing"));
    }
}
