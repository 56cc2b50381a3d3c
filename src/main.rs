//! Framesync Server
//!
//! Authoritative lockstep frame server. Sequences per-tick inputs into an
//! ordered frame stream and broadcasts it to every room member; all
//! simulation happens deterministically on the clients.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framesync::{Config, GameServer, FRAME_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    info!("framesync server v{VERSION}");
    info!(
        "frame rate: {} Hz ({} ms per frame)",
        config.network.frame_rate,
        config.network.frame_time_ms()
    );
    info!(
        "rooms: up to {} players, game starts at 2",
        config.game.max_players_per_room
    );
    info!("listening on port {}", config.network.server_port);

    let server = Arc::new(GameServer::new(Arc::new(config)));

    // Ctrl-C begins a graceful shutdown: room tasks stop, sockets close
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server terminated")?;
    info!("bye");
    Ok(())
}

/// Load `config.json` next to the binary if present, defaults otherwise.
/// A present-but-invalid config is fatal: peers must agree on it, so
/// guessing is worse than refusing to start.
fn load_config() -> anyhow::Result<Config> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_owned());
    if Path::new(&path).exists() {
        let config = Config::from_file(&path).with_context(|| format!("loading {path}"))?;
        info!("loaded configuration from {path}");
        Ok(config)
    } else {
        info!("no config file at {path}, using defaults ({FRAME_RATE} Hz)");
        Ok(Config::default())
    }
}
