//! Configuration structures for the synchronization engine.
//!
//! Loaded from the `sync` subtree of the pmoconfig store. Every field has a
//! default so a missing or partial subtree still yields a usable config.

use crate::client::{ClientBuilder, SyncClient};
use crate::constants::*;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl SyncConfig {
    pub fn load_from_pmoconfig() -> anyhow::Result<Self> {
        let cfg = pmoconfig::get_config();
        Ok(Self::from_pmoconfig(&cfg))
    }

    /// Read the `sync` subtree of an explicit config store
    pub fn from_pmoconfig(cfg: &pmoconfig::Config) -> Self {
        match cfg.get_value(&["sync"]) {
            Ok(value) => serde_yaml::from_value(value).unwrap_or_else(|e| {
                tracing::warn!("Invalid sync configuration, using defaults: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Client builder preconfigured from the server block
    pub fn client_builder(&self) -> ClientBuilder {
        let mut builder = SyncClient::builder()
            .api_base(self.server.api_base.clone())
            .timeout(self.server.request_timeout());
        if let Some(ws_url) = &self.server.ws_url {
            builder = builder.ws_url(ws_url.clone());
        }
        if let Some(token) = &self.server.session_token {
            builder = builder.session_token(token.clone());
        }
        builder
    }

    pub fn build_client(&self) -> Result<SyncClient> {
        self.client_builder().build()
    }
}

/// Station endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_api_base")]
    pub api_base: String,
    /// Explicit push channel URL; derived from `api_base` when absent
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Sent as `Cookie` header on HTTP requests and the WebSocket handshake
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "ServerConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerConfig {
    fn default_api_base() -> String {
        DEFAULT_API_BASE.to_string()
    }

    const fn default_request_timeout_ms() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_MS
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            ws_url: None,
            session_token: None,
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Tick, heartbeat and reconnect cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "TimingConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "TimingConfig::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "TimingConfig::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl TimingConfig {
    const fn default_tick_interval_ms() -> u64 {
        DEFAULT_TICK_INTERVAL_MS
    }

    const fn default_heartbeat_interval_ms() -> u64 {
        DEFAULT_HEARTBEAT_INTERVAL_MS
    }

    const fn default_reconnect_delay_ms() -> u64 {
        DEFAULT_RECONNECT_DELAY_MS
    }

    // Zero intervals would make tokio::time::interval panic
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval_ms(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            reconnect_delay_ms: Self::default_reconnect_delay_ms(),
        }
    }
}

/// Fired-event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "EventsConfig::default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl EventsConfig {
    const fn default_broadcast_capacity() -> usize {
        DEFAULT_EVENT_BROADCAST_CAPACITY
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: Self::default_broadcast_capacity(),
        }
    }
}
