//! Main Entrypoint for the Murmur Voice Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Wiring the connection controller to the real WebSocket transport, the
//!    on-disk session mirror, and the capture/playback collaborators.
//! 4. Driving a small interactive loop on stdin until Ctrl+C.
//!
//! There is no microphone integration here; audio capture is supplied by the
//! embedding application through [`murmur_client::capture::CaptureBridge`].
//! This binary runs with the null bridge, which makes it a text-mode client
//! that still exercises the full connection lifecycle.

use anyhow::Context;
use murmur_client::{
    capture::NullBridge,
    config::Config,
    controller::ConnectionController,
    playback::LogPlayback,
    transport::WsTransport,
};
use murmur_core::session::{FileSlot, SessionMirror};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(server_url = %config.server_url, "Configuration loaded.");

    // --- 3. Wire the Controller ---
    let mirror = SessionMirror::new(Box::new(FileSlot::new(
        config.session_state_path.clone(),
    )));
    let (handle, task) = ConnectionController::spawn(
        config,
        Arc::new(WsTransport),
        mirror,
        Arc::new(NullBridge::default()),
        Arc::new(LogPlayback),
    );

    // Surface status transitions as they happen.
    let mut status_rx = handle.status_updates();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            info!(status = %*status_rx.borrow(), "conversation status");
        }
    });

    handle.connect();

    // --- 4. Interactive Loop ---
    info!("Type a message and press enter to send it; Ctrl+C to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    handle.send_text(line.trim());
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Disconnecting...");
                break;
            }
        }
    }

    // --- 5. Graceful Shutdown ---
    handle.disconnect();
    drop(handle);
    task.await.context("controller task panicked")?;
    info!("Client has shut down.");
    Ok(())
}
