use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

/// Forwarding target for the capture endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Base URL that `/proxy/<path>` requests are relayed to.
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Maximum bytes of each body kept as a preview. The proxied stream
    /// itself is never truncated.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Number of records held before the oldest is evicted.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    /// Records pushed to a WebSocket subscriber on connect.
    #[serde(default = "default_rehydrate_limit")]
    pub rehydrate_limit: usize,
    /// Origin allowed to call the query API and subscription channel.
    #[serde(default = "default_dashboard_origin")]
    pub dashboard_origin: String,
}

/// Optional downstream trace exporter. Disabled when absent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            events: EventsConfig::default(),
            exporter: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preview_limit: default_preview_limit(),
            capacity: default_capacity(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            rehydrate_limit: default_rehydrate_limit(),
            dashboard_origin: default_dashboard_origin(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4317
}

fn default_preview_limit() -> usize {
    4096
}

fn default_capacity() -> usize {
    2000
}

fn default_rehydrate_limit() -> usize {
    100
}

fn default_dashboard_origin() -> String {
    "http://localhost:4320".to_string()
}
