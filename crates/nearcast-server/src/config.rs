//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::time::Duration;

use nearcast_shared::constants::{DEFAULT_HTTP_PORT, HOST_TTL_SECS, SIGNAL_TTL_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// How long a host claim on a room code stays valid.
    /// Env: `HOST_TTL_SECS`
    /// Default: 3600
    pub host_ttl: Duration,

    /// How long an undelivered signal survives before expiry.
    /// Env: `SIGNAL_TTL_SECS`
    /// Default: 300
    pub signal_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            host_ttl: Duration::from_secs(HOST_TTL_SECS),
            signal_ttl: Duration::from_secs(SIGNAL_TTL_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(val) = std::env::var("HOST_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.host_ttl = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid HOST_TTL_SECS, using default");
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.signal_ttl = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid SIGNAL_TTL_SECS, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.host_ttl, Duration::from_secs(3600));
        assert_eq!(config.signal_ttl, Duration::from_secs(300));
    }
}
