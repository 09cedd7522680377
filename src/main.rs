//! CLI entry point for the roll-off roof controller.
//!
//! # Usage
//!
//! ```bash
//! roofctl --config config/roof.toml open
//! roofctl close            # alias: park
//! roofctl abort
//! roofctl status --json
//! roofctl --mock open      # simulated roof, no hardware
//! ```
//!
//! Exit status is non-zero when a motion is rejected or ends for any reason
//! other than reaching its limit switch.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roof_control::config::{RoofConfig, DEFAULT_CONFIG_PATH};
use roof_control::logging::{self, OutputFormat, TracingConfig};
use roof_control::service::{wait_terminal, RoofService};
use roof_control::sinks::{status_line, StatusFile};
use roof_control::RoofError;
use roof_core::{Direction, ParkStatus, StartOutcome, StatusEvent, TerminalReason};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Time allowed for the runner to stop the roof on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "roofctl")]
#[command(about = "Roll-off roof motion controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated roof instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the roof and wait for the open limit switch
    #[command(alias = "unpark")]
    Open,

    /// Close the roof and wait for the closed limit switch
    #[command(alias = "park")]
    Close,

    /// Stop the motor immediately
    Abort,

    /// Read the limit switches and report the park status
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also write the three-field status line to this file
        #[arg(long)]
        status_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "roofctl failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = RoofConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.mock {
        config.use_mock();
    }
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.application.log_format = format.clone();
    }
    config.validate()?;
    init_logging(&config)?;

    tracing::info!(name = %config.application.name, kind = ?config.connection.kind, "starting");
    let service = RoofService::start(&config).await?;

    let code = match cli.command {
        Commands::Open => drive(&service, Direction::Open).await,
        Commands::Close => drive(&service, Direction::Close).await,
        Commands::Abort => {
            let event = service.abort().await?;
            print_event(&event);
            Ok(if event.stop_confirmed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Status { json, status_file } => status(&service, json, status_file).await,
    };

    service.shutdown(SHUTDOWN_GRACE).await;
    code
}

fn init_logging(config: &RoofConfig) -> Result<()> {
    let tracing_config = TracingConfig::from_config(config).map_err(anyhow::Error::msg)?;
    let tracing_config = if tracing_config.format == OutputFormat::Pretty {
        tracing_config
    } else {
        tracing_config.with_ansi(false)
    };
    logging::init(tracing_config).map_err(anyhow::Error::msg)
}

/// Start a drive cycle and wait for it; Ctrl-C cancels the motion.
async fn drive(service: &RoofService, direction: Direction) -> Result<ExitCode> {
    let handle = service.handle();
    let mut events = service.subscribe();

    match handle.start(direction).await? {
        StartOutcome::Busy => {}
        StartOutcome::Rejected(rejection) => {
            println!("{direction} rejected: {rejection}");
            return Ok(ExitCode::FAILURE);
        }
    }
    println!("roof moving: {direction}");

    let event = tokio::select! {
        event = wait_terminal(&mut events) => event?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling motion");
            handle.cancel().await?;
            wait_terminal(&mut events).await?
        }
    };

    print_event(&event);
    Ok(exit_for(&event))
}

async fn status(
    service: &RoofService,
    json: bool,
    status_file: Option<PathBuf>,
) -> Result<ExitCode> {
    let park = service.refresh().await?;
    let snapshot = service.snapshot().await?;

    if let Some(path) = status_file {
        StatusFile::new(&path)
            .write(park)
            .map_err(RoofError::Io)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("park: {}", park_label(park));
        println!("state: {}", snapshot.state.as_str());
        println!("status line: {}", status_line(park));
        if snapshot.link_degraded {
            println!("warning: controller did not answer the switch query");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn park_label(park: ParkStatus) -> &'static str {
    match park {
        ParkStatus::Parked => "parked (closed)",
        ParkStatus::Unparked => "unparked (open)",
        ParkStatus::Unknown => "unknown",
    }
}

fn print_event(event: &StatusEvent) {
    println!(
        "{}: park {}",
        event.reason.as_str(),
        park_label(event.park)
    );
    if event.degraded {
        println!(
            "warning: {} switch poll(s) went unanswered",
            event.unreachable_polls
        );
    }
    if !event.stop_confirmed {
        println!("warning: stop command could not be delivered, check the roof");
    }
}

fn exit_for(event: &StatusEvent) -> ExitCode {
    if event.reason == TerminalReason::LimitReached {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
