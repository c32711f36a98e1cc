//! Torstatus Protocol -- Tor control protocol wire types, line codec, reply grammar.
//!
//! Text protocol over a local stream socket. Requests are single lines
//! terminated by `\n`. Replies are one or more `SSS<marker><payload>` lines
//! where `-` marks a continuation and anything else ends the reply.

pub mod codec;
pub mod messages;
pub mod reply;

pub use codec::LineCodec;
pub use messages::*;
pub use reply::{Reply, ReplyAssembler, ReplyLine};

/// Default control host (loopback).
pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";

/// Default control port.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// The only PROTOCOLINFO version this client speaks.
pub const PROTOCOL_INFO_VERSION: u32 = 1;

/// Status code for a successful reply.
pub const STATUS_OK: u16 = 250;

/// Number of cookie bytes sent with AUTHENTICATE.
pub const AUTH_COOKIE_LEN: usize = 32;

/// Interval between reconnection attempts while auto-retry is enabled.
pub const RETRY_INTERVAL_MS: u64 = 1000;

/// Interval between bootstrap-phase polls while connected.
pub const POLL_INTERVAL_MS: u64 = 1500;

/// Coarse failure class. Callers switch on this instead of matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket-level failure: refused, unreachable, lost mid-command.
    Connection,
    /// The daemon answered, but not with what we expected.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("connection error: {0}")]
    Connection(String),
    /// Peer closed the socket. Distinct from a protocol failure.
    #[error("lost connection to control port")]
    Disconnected,
    #[error("{message}")]
    Protocol {
        message: String,
        status: Option<u16>,
    },
}

impl ControlError {
    pub fn connection(message: impl Into<String>) -> Self {
        ControlError::Connection(message.into())
    }

    pub fn protocol(message: impl Into<String>, status: Option<u16>) -> Self {
        ControlError::Protocol {
            message: message.into(),
            status,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Connection(_) | ControlError::Disconnected => ErrorKind::Connection,
            ControlError::Protocol { .. } => ErrorKind::Protocol,
        }
    }

    /// Status code carried by a protocol error, when the daemon sent one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ControlError::Protocol { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<std::io::Error> for ControlError {
    fn from(e: std::io::Error) -> Self {
        ControlError::Connection(e.to_string())
    }
}
