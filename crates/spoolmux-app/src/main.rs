// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolmux — tick-driven multi-protocol print server.
//
// Entry point. Initialises logging, loads configuration, binds the three
// listeners, and drives the dispatcher from a single-threaded tick loop
// until Ctrl-C.

use std::time::Duration;

use tracing::info;

use spoolmux_core::config::ServerConfig;
use spoolmux_core::error::Result;
use spoolmux_server::{PrintServer, SpoolEngine, StaticNetwork};

/// Interval between slot-usage status log lines.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading configuration");
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    };

    info!("Spoolmux starting");

    let engine = SpoolEngine::new(&config.spool_dir, config.max_clients)?;
    let netmgr = StaticNetwork::new();
    let tick_interval = Duration::from_millis(config.tick_interval_ms.max(1));

    let mut server = PrintServer::bind(config, Box::new(engine), Box::new(netmgr))?;

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(STATUS_LOG_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = status.tick() => {
                server.log_status();
            }
            _ = ticker.tick() => {
                // The dispatcher never blocks; one call services every
                // slot plus at most one request per protocol listener.
                server.process();
            }
        }
    }

    server.shutdown();
    info!("Spoolmux stopped");
    Ok(())
}
