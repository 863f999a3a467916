use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::ArgAction;
use clap::Parser;
use mill_bridge::driver::StatusApiDriver;
use mill_bridge::Config;
use mill_bridge::DeviceDescriptor;
use mill_bridge::LogLevel;
use mill_bridge::PollSettings;
use mill_bridge::Runtime;
use tracing_subscriber::prelude::*;

/// Expose Mill heaters as heater accessories behind one bridge
#[derive(Debug, Parser)]
#[command(name = "mill_bridge", version)]
struct Cli {
    /// Name and connection details for each heater to monitor
    #[arg(
        long = "heater",
        value_names = ["NAME", "HOST[:PORT]"],
        num_args = 2,
        action = ArgAction::Append
    )]
    heaters: Vec<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

/// Everything needed to start, resolved before any logging or I/O.
struct Startup {
    config: Config,
    descriptors: Vec<DeviceDescriptor>,
    poll: PollSettings,
}

fn load(cli: &Cli) -> anyhow::Result<Startup> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let extra: Vec<(String, String)> = cli
        .heaters
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let descriptors = config
        .descriptors(&extra)
        .context("Invalid heater configuration")?;
    let poll = config.poll_settings()?;

    Ok(Startup {
        config,
        descriptors,
        poll,
    })
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let startup = match load(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("mill_bridge: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(startup.config.logging.targets())
        .init();

    tracing::info!("mill_bridge {} starting", env!("CARGO_PKG_VERSION"));
    for d in &startup.descriptors {
        tracing::info!("Heater '{}' at {}", d.name, d.address());
    }

    let bridge = &startup.config.bridge;
    let driver = match StatusApiDriver::new(&bridge.listen, bridge.port) {
        Ok(driver) => driver,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = Runtime::new(driver)
        .with_bridge_name(bridge.name.as_str())
        .with_poll_settings(startup.poll)
        .run(&startup.descriptors, shutdown_signal())
        .await;

    match result {
        Ok(()) => {
            tracing::info!("mill_bridge shutdown complete");
            ExitCode::SUCCESS
        }
        // Already reported by the runtime
        Err(_) => ExitCode::FAILURE,
    }
}
