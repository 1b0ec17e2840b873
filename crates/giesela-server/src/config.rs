//! Server configuration.

use std::{net::SocketAddr, time::Duration};

use giesela_proto::DEFAULT_MAX_FRAME_SIZE;

use crate::error::ServerError;

/// Runtime configuration for [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:5005")
    pub bind_address: String,
    /// Connection ceiling. Accepting pauses while it is reached.
    pub max_connections: usize,
    /// Sleep before retrying accept while at the ceiling
    pub accept_backoff: Duration,
    /// Periodic room-state broadcast interval; `None` disables the timer
    pub broadcast_interval: Option<Duration>,
    /// Upper bound on a single socket write
    pub send_timeout: Duration,
    /// Upper bound on a metadata lookup
    pub resolver_timeout: Duration,
    /// Largest declared frame length accepted from clients
    pub max_frame_size: usize,
    /// Initial receive buffer capacity per connection
    pub read_buffer_size: usize,
    /// How long a buffered bare number may wait for the rest of a length
    /// prefix before it is taken as an unframed message
    pub prefix_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5005".to_string(),
            max_connections: 10,
            accept_backoff: Duration::from_secs(5),
            broadcast_interval: Some(Duration::from_secs(5)),
            send_timeout: Duration::from_secs(5),
            resolver_timeout: Duration::from_secs(3),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 1024,
            prefix_idle_timeout: Duration::from_millis(200),
        }
    }
}

impl ServerConfig {
    /// Check the configuration and parse the bind address.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the bind address does not parse, or
    ///   `max_connections` or `max_frame_size` is zero
    pub fn validate(&self) -> Result<SocketAddr, ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(ServerError::Config("max_frame_size must be at least 1".to_string()));
        }
        if self.broadcast_interval.is_some_and(|d| d.is_zero()) {
            return Err(ServerError::Config(
                "broadcast_interval must be non-zero; use None to disable".to_string(),
            ));
        }

        self.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address {:?}: {e}", self.bind_address))
        })
    }
}
