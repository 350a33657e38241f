//! Broadcast relay binary.
//!
//! Runs the whole push path in one process: an optional bus forwarder,
//! a subscriber that feeds bus events into the fanout, and the HTTP +
//! `WebSocket` server browser clients connect to.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `plotcast-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Spawn the fanout task with the configured auth policy
//! 4. Start the forwarder (unless another process runs it)
//! 5. Start the bus subscriber
//! 6. Bind and serve the client server
//! 7. On Ctrl-C, stop everything in reverse, wait for client tasks to
//!    finish, and check the fanout is idle

mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use plotcast_bus::{BroadcastForwarder, Subscriber};
use plotcast_fanout::{AuthRegistry, FanoutHandle, FanoutManager};
use plotcast_server::{AppState, Server};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DEFAULT_CONFIG_PATH, LoggingConfig, RelayConfig};
use crate::error::RelayError;

/// How long shutdown waits for `WebSocket` tasks to finish.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application entry point for the relay.
///
/// # Errors
///
/// Returns an error if any startup step fails.
#[tokio::main]
async fn main() -> Result<(), RelayError> {
    // 1. Load configuration. Logging is not up yet, so remember where it
    //    came from and report once it is.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("plotcast-relay starting");
    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }

    // 3. Fanout task.
    let auth = AuthRegistry::new(config.fanout.unregistered_auth);
    let (fanout, fanout_task) =
        FanoutHandle::spawn(FanoutManager::with_auth(auth), config.fanout.command_buffer);
    info!(
        command_buffer = config.fanout.command_buffer,
        unregistered_auth = ?config.fanout.unregistered_auth,
        "Fanout task started"
    );

    // 4. Forwarder.
    let mut forwarder = if config.bus.run_forwarder {
        let mut forwarder = BroadcastForwarder::new(&config.bus.input, &config.bus.output);
        let addrs = forwarder.start().await?;
        info!(input = %addrs.input, output = %addrs.output, "Forwarder running");
        Some(forwarder)
    } else {
        info!("Using an external forwarder");
        None
    };

    // 5. Bus subscriber.
    let mut subscriber = Subscriber::new(config.bus.subscribe_addrs(), fanout.clone())
        .with_poll_interval(config.bus.poll_interval())
        .with_reconnect_delay(config.bus.reconnect_delay());
    subscriber.start();

    // 6. Client server.
    let state = Arc::new(AppState::with_connection_buffer(
        fanout.clone(),
        config.fanout.connection_buffer,
    ));
    let server = Server::bind(&config.server.to_server_config(), Arc::clone(&state)).await?;
    info!(addr = %server.local_addr(), "Client server bound");
    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.serve(async move {
        let _ = server_stopped.await;
    }));

    // 7. Wait for Ctrl-C, then shut down.
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| RelayError::Signal { source })?;
    info!("Shutdown requested");

    subscriber.stop().await;
    if let Some(forwarder) = forwarder.as_mut() {
        forwarder.stop().await;
    }
    let _ = stop_server.send(());
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Client server exited with error"),
        Err(e) => warn!(error = %e, "Client server task failed"),
    }

    // Every socket task must release its registration before the fanout
    // stops, or the tables are not empty when it is joined.
    if state.disconnect_clients(CLIENT_DRAIN_TIMEOUT).await? {
        info!("Client connections closed");
    } else {
        warn!(
            remaining = state.active_clients(),
            "Client tasks still running after the drain timeout"
        );
    }

    fanout.shutdown().await?;
    let manager = fanout_task.join().await?;
    let stats = manager.stats();
    if stats.is_idle() {
        info!("Fanout tables empty at shutdown");
    } else {
        error!(
            connections = stats.connections,
            topics = stats.topics,
            subscriptions = stats.subscriptions,
            "Fanout tables not empty at shutdown"
        );
    }

    info!("plotcast-relay stopped");
    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the config.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration from the YAML file, or use defaults if it is absent.
///
/// Returns the path that was read, if any.
fn load_config() -> Result<(RelayConfig, Option<PathBuf>), RelayError> {
    let path = std::env::var("PLOTCAST_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if Path::new(&path).exists() {
        let config = RelayConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        let mut config = RelayConfig::default();
        config.apply_env_overrides()?;
        Ok((config, None))
    }
}
