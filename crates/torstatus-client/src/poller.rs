//! Bootstrap poller -- GETINFO status/bootstrap-phase, change detection.
//!
//! Only a change in the percentage produces a transition; an identical
//! snapshot every poll interval stays silent.

use torstatus_protocol::{BootstrapStatus, Command, ControlError};

use crate::state::ConnectionState;
use crate::transport::Connection;

#[derive(Debug, Default)]
pub struct BootstrapPoller {
    last: Option<BootstrapStatus>,
}

impl BootstrapPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last status that produced a transition.
    pub fn last(&self) -> Option<&BootstrapStatus> {
        self.last.as_ref()
    }

    /// Forget the stored status so the next poll always reports.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Record a status; returns the new state if the percentage moved.
    pub fn observe(&mut self, status: BootstrapStatus) -> Option<ConnectionState> {
        if self.last.as_ref().map(|s| s.percent) == Some(status.percent) {
            return None;
        }

        let next = ConnectionState::from_bootstrap(&status);
        tracing::info!(
            percent = status.percent,
            summary = %status.summary,
            "bootstrap state changed"
        );
        self.last = Some(status);
        Some(next)
    }

    /// Query the daemon once.
    pub async fn poll(
        &mut self,
        conn: &mut Connection,
    ) -> Result<Option<ConnectionState>, ControlError> {
        let reply = conn
            .command(&Command::bootstrap_phase())
            .await?
            .expect_ok("could not read bootstrap status")?;
        let status = BootstrapStatus::from_reply(&reply)?;
        Ok(self.observe(status))
    }
}
