//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use fuente_shared::constants::{APP_NAME, DEFAULT_FREEZE_REPORT_THRESHOLD, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and WebSocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3100`
    pub http_addr: SocketAddr,

    /// Origin of the web client, allowed by CORS with credentials.
    /// Env: `CLIENT_URL`
    /// Default: `http://localhost:3000`
    pub client_url: String,

    /// Mark the identity cookie `Secure` (HTTPS deployments).
    /// Env: `COOKIE_SECURE` (true/false)
    /// Default: `false`
    pub cookie_secure: bool,

    /// Identities that may be created from one device fingerprint (0 = unlimited).
    /// Env: `MAX_IDENTITIES_PER_DEVICE`
    /// Default: `0`
    pub max_identities_per_device: usize,

    /// Reports after which every conversation of the reported user freezes.
    /// Env: `FREEZE_REPORT_THRESHOLD`
    /// Default: `3`
    pub freeze_report_threshold: u32,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"La Fuente"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            client_url: "http://localhost:3000".to_string(),
            cookie_secure: false,
            max_identities_per_device: 0,
            freeze_report_threshold: DEFAULT_FREEZE_REPORT_THRESHOLD,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(url) = lookup("CLIENT_URL") {
            if !url.is_empty() {
                config.client_url = url;
            }
        }

        if let Some(val) = lookup("COOKIE_SECURE") {
            config.cookie_secure = parse_flag(&val);
        }

        if let Some(val) = lookup("MAX_IDENTITIES_PER_DEVICE") {
            match val.parse::<usize>() {
                Ok(n) => config.max_identities_per_device = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_IDENTITIES_PER_DEVICE, using default"),
            }
        }

        if let Some(val) = lookup("FREEZE_REPORT_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.freeze_report_threshold = n,
                _ => tracing::warn!(value = %val, "Invalid FREEZE_REPORT_THRESHOLD, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}
