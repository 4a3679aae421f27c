use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use globe_coords::control::{RawModeWriter, serve_control, spawn_key_reader};
use globe_coords::{
    CalibrationState, CoordinateDriver, CoordinateSink, HttpPostSink, LogSink, OrientationSensor,
    ReplaySensor, SimulatedGlobe, TcpJsonSink, TransportKind, WebSocketSink, load_config,
};

#[derive(Parser, Debug)]
#[command(name = "globe-coords")]
#[command(about = "Streams the latitude/longitude a rotating globe is pointing at", long_about = None)]
struct Args {
    /// TOML configuration file; defaults are used when it does not exist
    #[arg(long, default_value = "globe-coords.toml")]
    config: PathBuf,

    /// Replay recorded samples from a CSV file instead of simulating
    #[arg(long, value_name = "CSV")]
    replay: Option<PathBuf>,

    /// Relay address or URL (overrides the config)
    #[arg(long, value_name = "ADDR")]
    connect: Option<String>,

    /// How to reach the relay: tcp, websocket or http (overrides the config)
    #[arg(long, value_name = "KIND", value_parser = parse_transport_kind)]
    transport: Option<TransportKind>,

    /// Accept calibration commands on this TCP address (overrides the config)
    #[arg(long, value_name = "ADDR")]
    control: Option<String>,

    /// Spin rate of the simulated globe in degrees per second
    #[arg(long, value_name = "DEG_PER_S")]
    spin_rate: Option<f64>,
}

fn parse_transport_kind(value: &str) -> Result<TransportKind, String> {
    match value {
        "tcp" => Ok(TransportKind::Tcp),
        "websocket" | "ws" => Ok(TransportKind::WebSocket),
        "http" => Ok(TransportKind::Http),
        other => Err(format!("unknown transport {other:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging. Keys are read in raw mode on a terminal, which
    // needs explicit carriage returns.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "globe_coords=info".into());
    if io::stdin().is_terminal() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(|| RawModeWriter::new(io::stdout()))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();

    let mut config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(rate) = args.spin_rate {
        config.simulation.spin_rate_deg_per_s = rate;
    }
    if let Some(address) = args.connect {
        config.transport.address = Some(address);
    }
    if let Some(kind) = args.transport {
        config.transport.kind = kind;
    }
    if let Some(address) = args.control {
        config.transport.control_address = Some(address);
    }

    let sensor: Box<dyn OrientationSensor> = match &args.replay {
        Some(path) => Box::new(
            ReplaySensor::from_path(path)
                .with_context(|| format!("loading replay {}", path.display()))?,
        ),
        None => {
            let period = config.driver.emit_interval().as_secs_f64();
            info!(
                spin_rate = config.simulation.spin_rate_deg_per_s,
                "No replay file given, using simulated globe"
            );
            Box::new(SimulatedGlobe::from_config(&config.simulation, period))
        }
    };

    let projector = config
        .validate(sensor.capabilities())
        .context("invalid configuration")?;
    let calibration = CalibrationState::new(config.calibration.clone(), &projector);

    let sink: Box<dyn CoordinateSink> = match &config.transport.address {
        Some(address) => {
            info!(%address, kind = ?config.transport.kind, "Streaming coordinates to relay");
            match config.transport.kind {
                TransportKind::Tcp => Box::new(TcpJsonSink::new(address.clone())),
                TransportKind::WebSocket => Box::new(WebSocketSink::new(address.clone())),
                TransportKind::Http => Box::new(
                    HttpPostSink::new(address.clone()).context("building HTTP client")?,
                ),
            }
        }
        None => {
            info!("No relay configured, logging coordinates");
            Box::new(LogSink::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                shutdown_tx.send_replace(true);
            }
        });
    }

    let keys = spawn_key_reader(command_tx.clone(), shutdown_tx.clone())
        .context("starting operator input")?;

    if let Some(address) = &config.transport.control_address {
        match TcpListener::bind(address).await {
            Ok(listener) => {
                tokio::spawn(serve_control(listener, command_tx.clone(), shutdown_tx.subscribe()));
            }
            Err(e) => warn!(%address, error = %e, "Control listener unavailable"),
        }
    }
    drop(command_tx);

    let mut driver = CoordinateDriver::new(
        sensor,
        sink,
        command_rx,
        projector,
        calibration,
        config.driver,
        config.calibration.step_timeout(),
    );
    let stats = driver.run(shutdown_rx).await;

    shutdown_tx.send_replace(true);
    tokio::task::spawn_blocking(move || keys.join()).await?;

    info!(
        emitted = stats.emitted,
        dropped = stats.dropped,
        calibrations = stats.calibrations,
        "Done"
    );
    Ok(())
}
