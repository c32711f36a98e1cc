//! Connection state, observer events, and point-in-time snapshots.

use serde::Serialize;
use std::fmt;

use torstatus_protocol::{BootstrapStatus, ProtocolInfo};

/// Closed → Ready → Bootstrapping ⇄ Bootstrapped, any state → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Closed,
    Ready,
    Bootstrapping,
    Bootstrapped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// A new identity is only useful once the daemon can build circuits.
    pub fn can_switch_identity(&self) -> bool {
        matches!(self, ConnectionState::Bootstrapped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Ready => "ready",
            ConnectionState::Bootstrapping => "bootstrapping",
            ConnectionState::Bootstrapped => "bootstrapped",
        }
    }

    /// State implied by a bootstrap percentage.
    pub fn from_bootstrap(status: &BootstrapStatus) -> Self {
        if status.is_complete() {
            ConnectionState::Bootstrapped
        } else {
            ConnectionState::Bootstrapping
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an observer can hear from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionStateChanged {
        state: ConnectionState,
        reason: Option<String>,
    },
    ProtocolError {
        message: String,
        status: Option<u16>,
    },
    SwitchedIdentity,
}

/// Client state at one instant, for status displays and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub reason: Option<String>,
    pub bootstrap: Option<BootstrapStatus>,
    pub protocol_info: Option<ProtocolInfo>,
    pub retry_active: bool,
    pub poll_active: bool,
}
