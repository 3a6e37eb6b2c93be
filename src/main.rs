//! fdtrace: inspect tracer captures and check that tracing works on this host.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fdtrace::parse::correlate;
use fdtrace::{Platform, TraceEventStore, TraceSession, TracerConfig};

#[derive(Parser)]
#[command(name = "fdtrace")]
#[command(about = "Find out which files a process reads and writes")]
#[command(version)]
struct Cli {
    /// Log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a capture file and print its first read or write as JSON
    Parse {
        /// Tracer format: linux (strace) or macos (fs_usage)
        #[arg(short, long, default_value = std::env::consts::OS)]
        platform: String,

        /// Capture file written by strace -y -f or fs_usage -w
        capture: PathBuf,
    },
    /// Trace a probe write from this process and print the observed event
    Probe {
        #[command(flatten)]
        tracer: TracerArgs,

        /// Keep the capture file at this path
        #[arg(long)]
        keep: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TracerArgs {
    /// strace binary
    #[arg(long, env = "FDTRACE_STRACE", default_value = "/bin/strace")]
    strace: PathBuf,

    /// fs_usage binary
    #[arg(long, env = "FDTRACE_FS_USAGE", default_value = "/usr/bin/fs_usage")]
    fs_usage: PathBuf,

    /// Run fs_usage directly instead of through sudo
    #[arg(long)]
    no_sudo: bool,

    /// Milliseconds to let the tracer attach
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    /// Milliseconds to let the capture catch up before stopping
    #[arg(long, default_value_t = 1000)]
    drain_ms: u64,

    /// Milliseconds between SIGTERM and SIGKILL
    #[arg(long, default_value_t = 500)]
    escalation_ms: u64,
}

impl From<TracerArgs> for TracerConfig {
    fn from(args: TracerArgs) -> Self {
        let elevate = if args.no_sudo {
            None
        } else {
            TracerConfig::default().elevate
        };
        TracerConfig::default()
            .with_strace_path(args.strace)
            .with_fs_usage_path(args.fs_usage)
            .with_elevate(elevate)
            .with_delays(
                Duration::from_millis(args.settle_ms),
                Duration::from_millis(args.drain_ms),
                Duration::from_millis(args.escalation_ms),
            )
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn run_parse(platform: &str, capture: PathBuf) -> Result<()> {
    let platform = Platform::from_os_name(platform)?;
    let file = File::open(&capture)
        .with_context(|| format!("Failed to open capture {}", capture.display()))?;
    let event = correlate(platform.parser().as_mut(), BufReader::new(file))
        .with_context(|| format!("Failed to parse {} as {platform}", capture.display()))?;
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}

fn run_probe(config: TracerConfig, keep: Option<PathBuf>) -> Result<()> {
    let platform = Platform::from_os_name(&config.target_os)?;
    let dir = tempfile::tempdir().context("Failed to create probe directory")?;
    let probe = dir.path().join("probe.txt");

    let store = TraceEventStore::new().context("Failed to create capture file")?;
    let session = TraceSession::new(store, config);
    let (written, store) = session
        .run(|| std::fs::write(&probe, b"fdtrace probe\n"))
        .context("Trace session failed")?;
    written.with_context(|| format!("Failed to write probe {}", probe.display()))?;

    let event = store
        .parse_events_as(platform)
        .context("Failed to parse capture")?;
    info!(probe = %probe.display(), found = event.is_some(), "probe traced");
    println!("{}", serde_json::to_string_pretty(&event)?);

    if let Some(path) = keep {
        store
            .persist(&path)
            .with_context(|| format!("Failed to keep capture at {}", path.display()))?;
        eprintln!("Capture kept at {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Parse { platform, capture } => run_parse(&platform, capture),
        Commands::Probe { tracer, keep } => run_probe(tracer.into(), keep),
    }
}
