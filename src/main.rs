//! Tether - keeps a chat server websocket session alive
//!
//! Connects, logs lifecycle changes and formatted post notifications, and
//! refreshes user statuses after every (re)connect until interrupted.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use tether::{config::Args, logging, session::actions, SessionClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.client_config();
    let formatter = args
        .notification_formatter()
        .map_err(|e| anyhow::anyhow!(e))?;

    info!("======================================");
    info!("  Tether - chat session client");
    info!("======================================");
    info!("Target: {}", config.target.as_deref().unwrap_or_default());
    info!("Authenticated: {}", config.token.as_deref().is_some_and(|t| !t.is_empty()));
    info!(
        "Retry: {}ms floor, {}ms cap, {} fast failures",
        config.backoff.min_delay.as_millis(),
        config.backoff.max_delay.as_millis(),
        config.backoff.fast_failures
    );
    info!("======================================");

    let client = SessionClient::new(config);
    let connected = Arc::new(Notify::new());

    let notify = Arc::clone(&connected);
    client.set_first_connect_callback(move || {
        info!("Connected");
        notify.notify_one();
    });
    let notify = Arc::clone(&connected);
    client.set_reconnect_callback(move || {
        info!("Reconnected");
        notify.notify_one();
    });
    client.set_close_callback(|failures| {
        warn!(failures, "Connection lost");
    });
    client.set_error_callback(|e| {
        warn!(error = %e, "Socket error");
    });
    client.set_missed_event_callback(|| {
        warn!("Missed events, local state may be stale");
    });
    client.set_event_callback(move |event| match formatter.format(&event) {
        Ok(Some(notification)) => info!(
            title = %notification.title,
            channel = %notification.channel,
            "{}",
            notification.body
        ),
        Ok(None) => {}
        Err(e) => warn!(event = %event.event, seq = event.seq, error = %e, "Failed to format event"),
    });

    client.reinitialize().await?;

    loop {
        tokio::select! {
            _ = connected.notified() => {
                let client = client.clone();
                tokio::spawn(async move {
                    match client.request(actions::GET_STATUSES, None).await.and_then(|r| r.into_result()) {
                        Ok(reply) => info!(
                            statuses = %reply.data().cloned().unwrap_or_default(),
                            "User statuses"
                        ),
                        Err(e) => warn!(error = %e, "Status refresh failed"),
                    }
                });
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    client.close();
    if let Ok(status) = client.status().await {
        info!(state = %status.state, "Session closed");
    }

    Ok(())
}
