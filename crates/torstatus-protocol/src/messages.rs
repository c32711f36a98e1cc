//! Control commands and the reply payloads this client understands.
//!
//! Only four commands are modelled: PROTOCOLINFO, AUTHENTICATE,
//! GETINFO status/bootstrap-phase and SIGNAL NEWNYM.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::reply::Reply;
use crate::{ControlError, AUTH_COOKIE_LEN, PROTOCOL_INFO_VERSION};

/// GETINFO key for the bootstrap phase.
pub const BOOTSTRAP_PHASE_KEY: &str = "status/bootstrap-phase";

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Switch to clean circuits (new identity).
    NewNym,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::NewNym => "NEWNYM",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    ProtocolInfo,
    /// Hex cookie, or empty for NULL auth.
    Authenticate(String),
    GetInfo(String),
    Signal(Signal),
}

impl Command {
    pub fn bootstrap_phase() -> Self {
        Command::GetInfo(BOOTSTRAP_PHASE_KEY.to_string())
    }

    /// The command keyword, safe to log.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ProtocolInfo => "PROTOCOLINFO",
            Command::Authenticate(_) => "AUTHENTICATE",
            Command::GetInfo(_) => "GETINFO",
            Command::Signal(_) => "SIGNAL",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ProtocolInfo => f.write_str("PROTOCOLINFO"),
            Command::Authenticate(secret) if secret.is_empty() => f.write_str("AUTHENTICATE"),
            Command::Authenticate(secret) => write!(f, "AUTHENTICATE {secret}"),
            Command::GetInfo(key) => write!(f, "GETINFO {key}"),
            Command::Signal(signal) => write!(f, "SIGNAL {}", signal.as_str()),
        }
    }
}

// Never print the cookie.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Authenticate(_) => f.write_str("Authenticate(<redacted>)"),
            other => write!(f, "{other}"),
        }
    }
}

/// Hex-encode an auth cookie: lowercase, two digits per byte, at most
/// `AUTH_COOKIE_LEN` bytes.
pub fn cookie_hex(cookie: &[u8]) -> String {
    let len = cookie.len().min(AUTH_COOKIE_LEN);
    hex::encode(&cookie[..len])
}

// ============================================================================
// PROTOCOLINFO
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AuthMethod {
    /// No authentication required (`NULL` on the wire).
    Null,
    Cookie,
    SafeCookie,
    HashedPassword,
    Other(String),
}

impl AuthMethod {
    pub fn parse(name: &str) -> Self {
        match name {
            "NULL" => AuthMethod::Null,
            "COOKIE" => AuthMethod::Cookie,
            "SAFECOOKIE" => AuthMethod::SafeCookie,
            "HASHEDPASSWORD" => AuthMethod::HashedPassword,
            other => AuthMethod::Other(other.to_string()),
        }
    }

    pub fn is_cookie(&self) -> bool {
        matches!(self, AuthMethod::Cookie | AuthMethod::SafeCookie)
    }
}

/// What the daemon told us about itself in PROTOCOLINFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    pub version: u32,
    pub auth_methods: BTreeSet<AuthMethod>,
    pub cookie_file: Option<PathBuf>,
    pub tor_version: Option<String>,
}

impl ProtocolInfo {
    /// Parse the payload lines of a successful PROTOCOLINFO reply.
    pub fn from_reply(reply: &Reply) -> Result<Self, ControlError> {
        let mut version = None;
        let mut auth_methods = BTreeSet::new();
        let mut cookie_file = None;
        let mut tor_version = None;

        for line in &reply.lines {
            let mut tokens = line.split(' ');
            match tokens.next() {
                Some("PROTOCOLINFO") => {
                    let raw = tokens.next().unwrap_or_default();
                    let parsed = raw.parse::<u32>().map_err(|_| {
                        ControlError::protocol(
                            format!("malformed PROTOCOLINFO version: {raw:?}"),
                            Some(reply.status),
                        )
                    })?;
                    version = Some(parsed);
                }
                Some("AUTH") => {
                    if let Some(methods) = find_unquoted(line, "METHODS=") {
                        auth_methods = methods
                            .split(',')
                            .filter(|m| !m.is_empty())
                            .map(AuthMethod::parse)
                            .collect();
                    }
                    if auth_methods.iter().any(AuthMethod::is_cookie) {
                        cookie_file = find_quoted(line, "COOKIEFILE=").map(PathBuf::from);
                    }
                }
                Some("VERSION") => {
                    tor_version = find_quoted(line, "Tor=");
                }
                _ => {}
            }
        }

        let version = version.ok_or_else(|| {
            ControlError::protocol("PROTOCOLINFO reply has no version", Some(reply.status))
        })?;

        Ok(Self {
            version,
            auth_methods,
            cookie_file,
            tor_version,
        })
    }

    pub fn ensure_supported(&self) -> Result<(), ControlError> {
        if self.version != PROTOCOL_INFO_VERSION {
            return Err(ControlError::protocol(
                format!("unsupported protocol version: {}", self.version),
                None,
            ));
        }
        Ok(())
    }

    pub fn accepts_cookie(&self) -> bool {
        self.auth_methods.iter().any(AuthMethod::is_cookie)
    }
}

// ============================================================================
// GETINFO status/bootstrap-phase
// ============================================================================

/// Bootstrap progress as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapStatus {
    pub percent: u8,
    pub summary: String,
    pub tag: Option<String>,
}

impl BootstrapStatus {
    /// Extract `PROGRESS=` and `SUMMARY="..."` from the reply text.
    /// Marker order does not matter; `TAG=` is optional.
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let raw = find_unquoted(text, "PROGRESS=").ok_or_else(|| {
            ControlError::protocol(format!("no PROGRESS in bootstrap status: {text}"), None)
        })?;
        let percent = raw
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                ControlError::protocol(format!("malformed bootstrap progress: {raw:?}"), None)
            })?;

        let summary = find_quoted(text, "SUMMARY=").ok_or_else(|| {
            ControlError::protocol(format!("no SUMMARY in bootstrap status: {text}"), None)
        })?;

        let tag = find_unquoted(text, "TAG=").map(str::to_string);

        Ok(Self {
            percent,
            summary,
            tag,
        })
    }

    pub fn from_reply(reply: &Reply) -> Result<Self, ControlError> {
        Self::parse(&reply.text()).map_err(|e| match e {
            ControlError::Protocol { message, .. } => ControlError::Protocol {
                message: format!("could not parse bootstrap status: {message}"),
                status: Some(reply.status),
            },
            other => other,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 100
    }
}

// ============================================================================
// Token helpers
// ============================================================================

/// Value after `key` up to the next whitespace.
fn find_unquoted<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = find_key(text, key)? + key.len();
    let rest = &text[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Quoted value after `key`, with `\"` and `\\` escapes resolved.
fn find_quoted(text: &str, key: &str) -> Option<String> {
    let start = find_key(text, key)? + key.len();
    let mut chars = text[start..].chars();
    if chars.next() != Some('"') {
        return None;
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(value),
            '\\' => value.push(chars.next()?),
            other => value.push(other),
        }
    }
    None
}

/// Position of `key` at the start of `text` or after whitespace.
fn find_key(text: &str, key: &str) -> Option<usize> {
    text.match_indices(key)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || text[..i].ends_with(char::is_whitespace))
}
