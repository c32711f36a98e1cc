//! Configuration types for torstatus.
//! Parsed from ~/.config/torstatus/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use torstatus_client::{ClientConfig, ControlAddr, PollErrorPolicy};
use torstatus_protocol::{
    DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT, POLL_INTERVAL_MS, RETRY_INTERVAL_MS,
};

use crate::expand_tilde;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unix control socket. Takes precedence over host/port.
    pub socket: Option<String>,
    /// Auth cookie path, overriding the one PROTOCOLINFO reports.
    pub cookie_file: Option<String>,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket: None,
            cookie_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_true")]
    pub auto_retry: bool,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 0 disables the read timeout.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub strict_status_codes: bool,
    #[serde(default)]
    pub poll_error_policy: PollErrorPolicy,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            auto_retry: true,
            retry_interval_ms: RETRY_INTERVAL_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            strict_status_codes: false,
            poll_error_policy: PollErrorPolicy::Report,
        }
    }
}

// Default value functions
fn default_host() -> String {
    DEFAULT_CONTROL_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn default_true() -> bool {
    true
}
fn default_retry_interval() -> u64 {
    RETRY_INTERVAL_MS
}
fn default_poll_interval() -> u64 {
    POLL_INTERVAL_MS
}
fn default_connect_timeout() -> u64 {
    5_000
}
fn default_read_timeout() -> u64 {
    10_000
}

impl Config {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn control_addr(&self) -> ControlAddr {
        match &self.control.socket {
            Some(socket) => ControlAddr::Unix(expand_tilde(socket)),
            None => ControlAddr::tcp(&self.control.host, self.control.port),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let c = &self.client;
        ClientConfig {
            addr: self.control_addr(),
            auto_retry: c.auto_retry,
            retry_interval: Duration::from_millis(c.retry_interval_ms.max(1)),
            poll_interval: Duration::from_millis(c.poll_interval_ms.max(1)),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            read_timeout: (c.read_timeout_ms > 0).then(|| Duration::from_millis(c.read_timeout_ms)),
            strict_status_codes: c.strict_status_codes,
            poll_error_policy: c.poll_error_policy,
            cookie_file: self.control.cookie_file.as_deref().map(expand_tilde),
        }
    }
}
