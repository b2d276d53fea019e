//! Wordrake - concurrent HTTP content and parameter discovery

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wordrake::fuzzer::{ChannelSink, Engine, JobControl, SinkEvent};
use wordrake::http::{Executor, HttpClient};
use wordrake::{Config, UserHint, WordrakeError};

/// Concurrent HTTP content and parameter discovery
#[derive(Parser, Debug)]
#[command(name = "wordrake")]
#[command(author, version, about = "Concurrent HTTP content and parameter discovery", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WORDRAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Target URL, overrides http.url
    #[arg(short, long)]
    url: Option<String>,

    /// Wordlist as path[:KEYWORD], may be repeated
    #[arg(short, long)]
    wordlist: Vec<String>,

    /// Input mode (clusterbomb, pitchfork, sniper)
    #[arg(long)]
    mode: Option<String>,

    /// Concurrent workers
    #[arg(short, long)]
    threads: Option<usize>,

    /// Result output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Lines)]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "WORDRAKE_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "WORDRAKE_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "WORDRAKE_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One human readable line per result
    Lines,
    /// One JSON object per result
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting wordrake");

    let config = load_config(&cli)?;
    // Resolving inputs may read input commands to their end
    let resolved = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || config.to_job())
            .await
            .context("Configuration task failed")?
    };
    let job = match resolved {
        Ok(job) => job,
        Err(errors) => {
            for error in errors.errors() {
                tracing::error!("{}", error.user_hint());
            }
            return Err(WordrakeError::Config(errors).into());
        }
    };

    if cli.validate_config {
        tracing::info!(
            total = %job.generator().total(),
            warnings = job.warnings().len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    let executor: Arc<dyn Executor> = Arc::new(
        HttpClient::new(&config.http_options()).context("Failed to build HTTP client")?,
    );
    let (sink, events) = ChannelSink::new(4096);
    let sink = Arc::new(sink);

    let mut engine = Engine::new(executor).with_sink(sink.clone());
    if let Some(options) = config.replay_options() {
        let replay = HttpClient::new(&options).context("Failed to build replay client")?;
        engine = engine.with_replay(Arc::new(replay));
    }

    tokio::spawn(handle_signals(engine.control()));
    let printer = spawn_printer(events, cli.output);

    tracing::info!(
        url = %job.spec().template.url,
        mode = %job.spec().mode,
        total = %job.generator().total(),
        threads = job.spec().dispatch.threads,
        "Starting run"
    );

    let summary = engine.run_validated(job).await;
    let dropped = sink.dropped();

    // Closing the last sender lets the printer drain and exit
    drop(engine);
    drop(sink);
    printer.await.context("Result printer failed")?;

    if dropped > 0 {
        tracing::warn!(dropped, "Some results were dropped by a lagging output");
    }
    if let Some(reason) = summary.aborted {
        tracing::warn!(%reason, "Run aborted");
    }

    Ok(())
}

/// Initialize the logging system. Results go to stdout, so console logs
/// are written to stderr.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = Path::new(log_path);
            let dir = path.parent().unwrap_or(Path::new("."));
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("wordrake.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(url) = &cli.url {
        config.http.url = url.clone();
    }
    if !cli.wordlist.is_empty() {
        config.input.wordlists = cli.wordlist.clone();
    }
    if let Some(mode) = &cli.mode {
        config.input.mode = mode.clone();
    }
    if let Some(threads) = cli.threads {
        config.general.threads = threads;
    }

    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    println!("{}", Config::default().to_toml()?);
    Ok(())
}

fn spawn_printer(
    mut events: tokio::sync::mpsc::Receiver<SinkEvent>,
    format: OutputFormat,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SinkEvent::Result(result) => match format {
                    OutputFormat::Lines => println!("{}", result),
                    OutputFormat::Json => match serde_json::to_string(&result) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize result"),
                    },
                },
                SinkEvent::JobFinished(outcome) => {
                    tracing::info!(
                        job = %outcome.meta.job_id,
                        url = %outcome.meta.url,
                        depth = outcome.meta.depth,
                        state = ?outcome.state,
                        stop_reason = ?outcome.stop_reason,
                        matched = outcome.stats.matched,
                        elapsed_ms = outcome.elapsed_ms,
                        "Job finished"
                    );
                }
            }
        }
    })
}

/// Cancel the run on Ctrl+C
async fn handle_signals(control: Arc<JobControl>) {
    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, cancelling");
            control.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl+C"),
    }
}
