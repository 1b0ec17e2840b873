//! Giesela companion server binary.
//!
//! Runs the control-plane server against the in-memory playback engine.
//!
//! # Usage
//!
//! ```bash
//! giesela-server --bind 0.0.0.0:5005
//!
//! # Tighter limits, no periodic broadcast
//! giesela-server --max-connections 4 --broadcast-interval-secs 0
//!
//! # Radio stations for RADIO;<name>
//! giesela-server --station "Chillhop=https://stream.example/chillhop,https://img.example/chill.png"
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use giesela_server::{
    EngineContext, MemoryEngine, RadioStation, Server, ServerConfig, TitleResolver,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Giesela companion control-plane server
#[derive(Parser, Debug)]
#[command(name = "giesela-server")]
#[command(about = "Companion app control server for the Giesela playback engine")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:5005")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10")]
    max_connections: usize,

    /// Seconds to wait before accepting again at the connection limit
    #[arg(long, default_value = "5")]
    accept_backoff_secs: u64,

    /// Seconds between room state broadcasts (0 disables)
    #[arg(long, default_value = "5")]
    broadcast_interval_secs: u64,

    /// Socket write timeout in milliseconds
    #[arg(long, default_value = "5000")]
    send_timeout_ms: u64,

    /// Largest accepted frame in bytes
    #[arg(long, default_value = "65536")]
    max_frame_size: usize,

    /// Radio station as name=stream_url[,cover_url]; repeatable
    #[arg(long = "station", value_name = "NAME=URL[,COVER]")]
    stations: Vec<RadioStation>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.bind.clone(),
            max_connections: self.max_connections,
            accept_backoff: Duration::from_secs(self.accept_backoff_secs),
            broadcast_interval: (self.broadcast_interval_secs > 0)
                .then(|| Duration::from_secs(self.broadcast_interval_secs)),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            max_frame_size: self.max_frame_size,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Giesela companion server starting");

    if args.stations.is_empty() {
        tracing::warn!("no radio stations configured, RADIO commands will fail");
    }
    let stations = args.stations.clone();
    let (engine, engine_task) = EngineContext::spawn(MemoryEngine::with_stations(stations));
    let server = Server::bind(args.config(), engine, Arc::new(TitleResolver)).await?;
    let handle = server.handle();

    tracing::info!("Server listening on {}", server.local_addr()?);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                handle.shutdown();
            },
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;

    engine_task.abort();
    tracing::info!("Giesela companion server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stations_are_repeatable() {
        let args = Args::try_parse_from([
            "giesela-server",
            "--station",
            "Chillhop=https://radio.example/chill",
            "--station",
            "Jazz=https://radio.example/jazz,https://radio.example/jazz.png",
        ])
        .unwrap();

        let names: Vec<_> = args.stations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Chillhop", "Jazz"]);
        assert_eq!(args.stations[1].cover_url, "https://radio.example/jazz.png");
    }

    #[test]
    fn malformed_station_is_a_usage_error() {
        assert!(Args::try_parse_from(["giesela-server", "--station", "Chillhop"]).is_err());
    }

    #[test]
    fn zero_interval_disables_periodic_broadcast() {
        let args = Args::try_parse_from(["giesela-server", "--broadcast-interval-secs", "0"]).unwrap();
        assert_eq!(args.config().broadcast_interval, None);
    }
}
