//! Torstatus Client -- connection lifecycle for a Tor control port.
//!
//! One tokio task per client owns the socket, the negotiated protocol info,
//! the last bootstrap status and both timers (auto-retry, bootstrap poll).
//! The cloneable `ControlClient` handle talks to it over a channel; observers
//! subscribe to `ClientEvent`s on a broadcast channel.

pub mod client;
pub mod negotiator;
pub mod poller;
pub mod state;
pub mod transport;

pub use client::{ClientError, ControlClient};
pub use poller::BootstrapPoller;
pub use state::{ClientEvent, ClientSnapshot, ConnectionState};
pub use transport::{Connection, ControlAddr};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use torstatus_protocol::{POLL_INTERVAL_MS, RETRY_INTERVAL_MS};

/// What a poll does with a reply it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollErrorPolicy {
    /// Keep the connection, emit a protocol-error event.
    #[default]
    Report,
    /// Treat the malformed reply like a lost connection.
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: ControlAddr,
    pub auto_retry: bool,
    pub retry_interval: Duration,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for one reply line. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Reject multi-line replies whose lines disagree on the status code.
    pub strict_status_codes: bool,
    pub poll_error_policy: PollErrorPolicy,
    /// Read the auth cookie from here instead of the PROTOCOLINFO path.
    pub cookie_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: ControlAddr::default(),
            auto_retry: true,
            retry_interval: Duration::from_millis(RETRY_INTERVAL_MS),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(10)),
            strict_status_codes: false,
            poll_error_policy: PollErrorPolicy::Report,
            cookie_file: None,
        }
    }
}
