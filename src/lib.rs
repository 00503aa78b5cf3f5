// Module declarations for the application's core components
pub mod channels;    // Broadcast channel plumbing between components
pub mod config;      // Configuration management
pub mod coordinator; // Session owner; serializes register operations
pub mod inverter;    // Register session and decoded domain types
pub mod options;     // Command line options parsing
pub mod prelude;     // Common imports and types
pub mod register;    // GoodWe register map and cell codecs
pub mod scanner;     // Subnet discovery and the device address cache
pub mod scheduler;   // Interval tasks: telemetry polling, battery cycling
pub mod transport;   // Register transport trait over Modbus TCP

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

pub fn init_logging(loglevel: &str) {
    use std::io::Write;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();
}

/// Locate the inverter and open a session: cached address first, full
/// subnet scan as fallback. A stale cache entry costs one failed connect
/// before the rescan.
async fn connect_inverter(config: &Config) -> Result<InverterSession> {
    let port = config.inverter().port();

    if let Some(cache_file) = config.inverter().cache_file() {
        if let Some(device) = scanner::read_cached_device(cache_file, port) {
            info!("trying cached inverter address {}", device);

            match InverterSession::connect(&device).await {
                Ok(session) => return Ok(session),
                Err(err) => warn!("cached address {} unusable ({:#}); rescanning", device, err),
            }
        }
    }

    let subnet = match config.inverter().subnet() {
        Some(subnet) => subnet.to_string(),
        None => scanner::local_subnet()?,
    };

    let device = scanner::find_inverter(&subnet, port).await?;

    if let Some(cache_file) = config.inverter().cache_file() {
        if let Err(err) = scanner::write_cached_device(cache_file, &device) {
            warn!("{:#}", err);
        }
    }

    InverterSession::connect(&device).await
}

/// Main application flow: discover, connect, then let the coordinator
/// drain scheduler commands until shutdown.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, config: Config) -> Result<()> {
    info!("goodwe-bridge {} starting", CARGO_PKG_VERSION);

    let mut session = connect_inverter(&config).await?;

    let identity = session.read_identity().await?;
    info!(
        "inverter {} ({}), rated {:.0} W, protocol version {}",
        identity.serial_number,
        identity.device_type,
        identity.rated_power,
        identity.protocol_version
    );

    let channels = Channels::new();

    let mut coordinator = Coordinator::new(session, &channels);
    let coordinator_handle = tokio::spawn(async move { coordinator.start().await });

    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_handle = tokio::spawn(async move { scheduler.start().await });

    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received, stopping components...");

    scheduler_handle.abort();
    let _ = channels
        .to_coordinator
        .send(coordinator::ChannelData::Shutdown);

    match coordinator_handle.await {
        Ok(result) => result?,
        Err(err) => error!("error waiting for coordinator task: {}", err),
    }

    info!("shutdown complete");

    Ok(())
}

/// Application entry point: wires ctrl-c to the shutdown channel and
/// runs the main flow.
pub async fn run(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", err);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_rx, config).await
}
