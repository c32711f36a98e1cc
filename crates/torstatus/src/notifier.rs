//! Notifier -- turns client events into user-facing messages.
//!
//! Only one message is pending at a time; a newer one replaces it. The
//! notifier is an ordinary value owned by whoever drives the event loop.

use torstatus_client::{ClientEvent, ConnectionState};

pub const MSG_BOOTSTRAPPED: &str = "Tor network bootstrapped successfully!";
pub const MSG_DISCONNECTED: &str = "Tor network disconnected!";
pub const MSG_SWITCHED: &str = "Switched to a new Tor identity!";

#[derive(Debug, Default)]
pub struct Notifier {
    state: ConnectionState,
    current: Option<String>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The message currently on display, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Feed one event. Returns the new message when the event produced one.
    pub fn handle(&mut self, event: &ClientEvent) -> Option<&str> {
        let message = match event {
            ClientEvent::ConnectionStateChanged { state, .. } => {
                let previous = std::mem::replace(&mut self.state, *state);
                match (previous, *state) {
                    (p, ConnectionState::Bootstrapped) if p != ConnectionState::Bootstrapped => {
                        Some(MSG_BOOTSTRAPPED.to_string())
                    }
                    (ConnectionState::Bootstrapped, s) if s != ConnectionState::Bootstrapped => {
                        Some(MSG_DISCONNECTED.to_string())
                    }
                    _ => None,
                }
            }
            ClientEvent::SwitchedIdentity => Some(MSG_SWITCHED.to_string()),
            ClientEvent::ProtocolError { message, status } => Some(protocol_error_message(
                message,
                *status,
            )),
        };

        let message = message?;
        tracing::debug!(%message, "notification");
        self.current = Some(message);
        self.current.as_deref()
    }
}

fn protocol_error_message(message: &str, status: Option<u16>) -> String {
    match status {
        Some(code) => format!("Tor control protocol error: {message} (status code {code})"),
        None => format!("Tor control protocol error: {message}"),
    }
}
