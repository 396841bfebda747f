//! Client configuration.
//!
//! Resolved from: CLI flags / env overrides > `<data>/config.toml` > defaults.
//! Durations in the file are plain milliseconds.

use std::path::Path;
use std::time::Duration;

use boardbank_protocol::HeartBeat;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::error::ConfigError;
use crate::transport::TransportConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the session command API, always ending in `/`.
    pub api_url: Url,
    pub request_timeout: Duration,
    pub transport: TransportConfig,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_ms: Option<u64>,
    transport: FileTransport,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileTransport {
    connect_timeout_ms: Option<u64>,
    heartbeat_outgoing_ms: Option<u64>,
    heartbeat_incoming_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    reconnect: FileReconnect,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileReconnect {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

impl Config {
    /// Load `path` if it exists and apply `overrides` on top.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    component = "config",
                    event = "config.file.missing",
                    path = %path.display(),
                    "No config file, using defaults"
                );
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_toml(&text, overrides)
    }

    pub fn from_toml(text: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        Self::resolve(file, overrides)
    }

    fn resolve(file: FileConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let api_raw = overrides
            .api_url
            .clone()
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = parse_api_url(&api_raw)?;

        let ws_url = match overrides.ws_url.clone().or(file.ws_url) {
            Some(raw) => parse_ws_url(&raw)?,
            None => derive_ws_url(&api_url),
        };

        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            initial_delay: ms(file.transport.reconnect.initial_delay_ms, defaults.initial_delay),
            max_delay: ms(file.transport.reconnect.max_delay_ms, defaults.max_delay),
            max_attempts: file
                .transport
                .reconnect
                .max_attempts
                .unwrap_or(defaults.max_attempts),
        };

        let transport = TransportConfig {
            ws_url,
            connect_timeout: ms(file.transport.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT),
            heart_beat: HeartBeat::new(
                ms(file.transport.heartbeat_outgoing_ms, DEFAULT_HEARTBEAT),
                ms(file.transport.heartbeat_incoming_ms, DEFAULT_HEARTBEAT),
            ),
            shutdown_timeout: ms(file.transport.shutdown_timeout_ms, DEFAULT_SHUTDOWN_TIMEOUT),
            reconnect,
        };

        Ok(Self {
            api_url,
            request_timeout: ms(file.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT),
            transport,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        value: raw.to_string(),
        source,
    })
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidScheme {
            field: "api_url",
            scheme: url.scheme().to_string(),
            expected: "http or https",
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = parse_url(raw)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::InvalidScheme {
            field: "ws_url",
            scheme: url.scheme().to_string(),
            expected: "ws or wss",
        });
    }
    Ok(url)
}

/// Broker endpoint next to the command API: same host, `ws`/`wss`, path `/ws`.
pub fn derive_ws_url(api_url: &Url) -> Url {
    let mut url = api_url.clone();
    let scheme = if api_url.scheme() == "https" { "wss" } else { "ws" };
    // http(s) -> ws(s) is a permitted special-scheme swap.
    let _ = url.set_scheme(scheme);
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    url
}
