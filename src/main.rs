//! # Sense Bridge
//!
//! Stream, display and record sensor data from a Nicla Sense ME board.
//!
//! Connects to the board, keeps a rolling window of every field for live
//! display, and records the stream as a session in the storage backend.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use sense_bridge::channel::protocol::{ChannelId, ChannelRegistry};
use sense_bridge::config::{Config, LoggingConfig};
use sense_bridge::device::{DeviceLink, SimulatedDevice};
use sense_bridge::session::{RecorderSettings, SessionRecorder};
use sense_bridge::telemetry::{ConnectionContext, DispatcherSettings, RollingBuffer};
use sense_bridge::transport::{HttpTransport, MemoryStore, TransportAdapter};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "SENSE_BRIDGE_CONFIG";

/// Configuration file used when the environment variable is unset
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Seconds between status log messages
const STATUS_INTERVAL_S: u64 = 10;

/// Resolve the configuration path; `true` if it was given explicitly
fn config_path(explicit: Option<String>) -> (PathBuf, bool) {
    match explicit {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

/// Load the configuration, falling back to defaults when the default file is absent
fn load_config() -> Result<(Config, String)> {
    let (path, explicit) = config_path(env::var(CONFIG_ENV).ok());

    if !explicit && !path.exists() {
        return Ok((Config::default(), "built-in defaults".to_string()));
    }

    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((config, path.display().to_string()))
}

/// Console logging, plus a daily rolling file when `log_dir` is set
///
/// `RUST_LOG` overrides the configured level. The returned guard must live
/// until exit so buffered file output is written.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sense-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Main entry point for Sense Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Pick the storage transport (HTTP backend, or in memory when offline)
///    - Connect to the board and start a recording session
///
/// 2. **Main Loop**
///    - Readings stream into the display buffers and the session recorder
///    - Log status every 10 seconds
///    - Exit on Ctrl+C or link loss
///
/// 3. **Graceful Shutdown**
///    - Stop the session (final flush)
///    - Stop the flush timer and disconnect
///
/// # Errors
///
/// Returns error if the configuration is invalid, no channel can be set up,
/// or the backend refuses to start the session.
#[tokio::main]
async fn main() -> Result<()> {
    let (config, source) = load_config()?;
    let _log_guard = init_logging(&config.logging);

    info!("Sense Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);

    let transport: Arc<dyn TransportAdapter> = if config.transport.offline {
        info!("Offline mode: sessions are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        let http = HttpTransport::new(
            &config.transport.base_url,
            Duration::from_millis(config.transport.request_timeout_ms),
        )?;
        info!("Storage backend: {}", http.base_url());
        Arc::new(http)
    };

    let recorder = Arc::new(SessionRecorder::new(
        transport,
        RecorderSettings::from(&config.recorder),
    ));
    let buffers = Arc::new(RollingBuffer::new(config.display.max_records));
    let registry = ChannelRegistry::with_channels(&config.channels.channel_ids()?);

    let device: Arc<dyn DeviceLink> = Arc::new(SimulatedDevice::new(config.device.name.clone()));
    let connection = ConnectionContext::connect(
        device,
        registry,
        DispatcherSettings::from(&config.device),
        Arc::clone(&buffers),
        Some(Arc::clone(&recorder)),
    )
    .await?;

    let request = config
        .session
        .to_request()
        .with_device(connection.device_name(), connection.device_id().map(String::from));
    let session = recorder.start(request).await?;

    let timer_token = CancellationToken::new();
    let flush_timer = recorder.spawn_flush_timer(timer_token.clone());

    // Green while recording
    if let Err(e) = connection.write_led(0, 255, 0).await {
        warn!("Could not set LED: {}", e);
    }

    info!("Recording \"{}\". Press Ctrl+C to stop", session.name);

    let mut status_interval = interval(Duration::from_secs(STATUS_INTERVAL_S));
    status_interval.tick().await;

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let stats = recorder.stats().await;
                let temperature = buffers
                    .latest(ChannelId::Temperature, "temperature")
                    .map(|t| format!("{:.1}°C", t))
                    .unwrap_or_else(|_| "n/a".to_string());
                info!(
                    "{} readings stored, {} pending, {} dropped | {} datums, {} decode errors | temperature {}",
                    stats.stored,
                    stats.pending,
                    stats.dropped,
                    connection.datums(),
                    connection.decode_errors(),
                    temperature
                );
            }

            _ = connection.closed() => {
                warn!("Connection to {} closed", connection.device_name());
                break;
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    match recorder.stop().await {
        Ok(stopped) => info!(
            "Session \"{}\" completed ({} ms)",
            stopped.name,
            stopped.ended_at.unwrap_or(stopped.started_at) - stopped.started_at
        ),
        Err(e) => error!("Failed to stop session: {}", e),
    }

    timer_token.cancel();
    flush_timer.await?;
    connection.disconnect().await?;

    Ok(())
}
