//! CLI Entry Point for radar-capture
//!
//! Provides command-line interface for:
//! - Capturing one digitizer stream into sweeps (database or sweep files)
//! - Inspecting a sweep file
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Capture with a config file, overriding the port:
//! ```bash
//! radar-capture capture --config capture.toml --port 12345
//! ```
//!
//! Look at a sweep file:
//! ```bash
//! radar-capture inspect sweeps/2024-05-01/13/FORCE-2024-05-01T13-00-02.120000.dat
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use radar_capture::config::CaptureConfig;
use radar_capture::logging::{self, OutputFormat, TracingConfig};
use radar_capture::storage::sweep_file::SweepFile;
use radar_capture::storage::StorageBackend;
use radar_capture::CaptureSession;
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given. A missing file means all defaults.
const DEFAULT_CONFIG_PATH: &str = "radar-capture.toml";

#[derive(Parser)]
#[command(name = "radar-capture")]
#[command(about = "Capture digitized radar pulses into sweeps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept one digitizer connection and store its sweeps
    Capture {
        #[command(flatten)]
        overrides: Overrides,

        /// Log output format: pretty, compact or json
        #[arg(long)]
        log_format: Option<String>,
    },

    /// Print a sweep file's header and array sizes
    Inspect {
        /// Path to a .dat sweep file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args)]
struct Overrides {
    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface address to listen on
    #[arg(long)]
    interface: Option<String>,

    /// TCP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Database file or sweep folder, depending on the storage backend
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Overrides {
    fn load(self) -> Result<CaptureConfig> {
        let path = self
            .config
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = CaptureConfig::load_from(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        if let Some(interface) = self.interface {
            config.network.interface = interface;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(output) = self.output {
            match config.storage.backend {
                StorageBackend::Database => config.storage.database.path = output,
                StorageBackend::SweepFile => config.storage.sweep_file.folder = output,
            }
        }
        config.validate().context("invalid command-line override")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Capture {
            overrides,
            log_format,
        } => capture(overrides.load()?, log_format),
        Commands::Inspect { file } => inspect(&file),
        Commands::ShowConfig { overrides } => {
            print!("{}", overrides.load()?.to_toml()?);
            Ok(())
        }
    }
}

fn capture(config: CaptureConfig, log_format: Option<String>) -> Result<()> {
    let mut tracing_config = TracingConfig::from_capture_config(&config)?;
    if let Some(format) = log_format {
        tracing_config = tracing_config.with_format(format.parse::<OutputFormat>()?);
    }
    if tracing_config.format != OutputFormat::Pretty {
        tracing_config = tracing_config.with_ansi(false);
    }
    logging::init(tracing_config)?;

    let mut session = CaptureSession::new(config).context("starting capture session")?;
    tracing::info!(addr = %session.local_addr(), "waiting for digitizer");

    let report = session.run().context("capture failed")?;
    tracing::info!(
        frames = report.ingest.frames,
        sweeps = report.persist.sweeps,
        early_flushes = report.persist.early_flushes,
        clock_regressions = report.persist.clock_regressions,
        chunks_skipped = report.ring.chunks_skipped,
        "capture complete"
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let file =
        SweepFile::read(path).with_context(|| format!("reading sweep file {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&file.header)?);
    println!("clocks:   {}", file.clocks.len());
    println!("azimuths: {}", file.azimuths.len());
    println!("trigs:    {}", file.trigger_counts.len());
    println!(
        "samples:  {} ({} x {})",
        file.samples.len(),
        file.header.np,
        file.header.ns
    );
    Ok(())
}
