//! Control client -- connection lifecycle, auto-retry, bootstrap polling.
//!
//! A single task owns every piece of mutable state. On each loop turn it
//! handles exactly one of:
//!   1. a command from a `ControlClient` handle (open, close, switch identity, ...)
//!   2. a retry tick: replay `open` in full, fresh negotiation included
//!   3. a poll tick: GETINFO status/bootstrap-phase
//!
//! Commands run to completion inside one turn, so the timers never overlap
//! a command in flight.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use torstatus_protocol::{Command, ControlError, ErrorKind, ProtocolInfo, Signal};

use crate::negotiator;
use crate::poller::BootstrapPoller;
use crate::state::{ClientEvent, ClientSnapshot, ConnectionState};
use crate::transport::Connection;
use crate::{ClientConfig, PollErrorPolicy};

/// Capacity of the event broadcast channel. Slow observers lag, never block.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("control client has been destroyed")]
    Destroyed,
    #[error(transparent)]
    Control(#[from] ControlError),
}

enum ClientCommand {
    Open(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
    SwitchIdentity(oneshot::Sender<Result<(), ControlError>>),
    Snapshot(oneshot::Sender<ClientSnapshot>),
    Destroy(oneshot::Sender<()>),
}

/// Handle to a running control client. Cheap to clone.
#[derive(Clone)]
pub struct ControlClient {
    cmd_tx: mpsc::Sender<ClientCommand>,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl ControlClient {
    /// Start the client task. Nothing connects until `open` is called.
    pub fn spawn(config: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task = ClientTask::new(config, event_tx.clone());
        tokio::spawn(run_client_loop(task, cmd_rx));

        Self { cmd_tx, event_tx }
    }

    /// Receive every event emitted from now on.
    ///
    /// The client keeps no reference to subscribers; dropping the receiver
    /// is all it takes to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Connect and negotiate. Failures surface as a `Closed` state event
    /// (and start auto-retry), not as an error here.
    pub async fn open(&self) -> Result<(), ClientError> {
        self.request(ClientCommand::Open).await
    }

    /// Stop both timers and drop the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.request(ClientCommand::Close).await
    }

    /// Send SIGNAL NEWNYM. Emits `SwitchedIdentity` on 250, `ProtocolError`
    /// on any other status; the same outcome is returned to the caller.
    pub async fn switch_identity(&self) -> Result<(), ClientError> {
        self.request(ClientCommand::SwitchIdentity).await??;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot, ClientError> {
        self.request(ClientCommand::Snapshot).await
    }

    /// Close and stop the client task. Idempotent; afterwards every other
    /// call returns `ClientError::Destroyed`.
    pub async fn destroy(&self) {
        if let Err(ClientError::Destroyed) = self.request(ClientCommand::Destroy).await {
            tracing::trace!("destroy on an already destroyed client");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| ClientError::Destroyed)?;
        rx.await.map_err(|_| ClientError::Destroyed)
    }
}

// ============================================================================
// Client task
// ============================================================================

struct ClientTask {
    config: ClientConfig,
    conn: Option<Connection>,
    state: ConnectionState,
    reason: Option<String>,
    protocol_info: Option<ProtocolInfo>,
    poller: BootstrapPoller,
    retry_timer: Option<Interval>,
    poll_timer: Option<Interval>,
    event_tx: broadcast::Sender<ClientEvent>,
}

async fn run_client_loop(mut task: ClientTask, mut cmd_rx: mpsc::Receiver<ClientCommand>) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Open(ack)) => {
                    task.open().await;
                    let _ = ack.send(());
                }
                Some(ClientCommand::Close(ack)) => {
                    task.close().await;
                    let _ = ack.send(());
                }
                Some(ClientCommand::SwitchIdentity(ack)) => {
                    let result = task.switch_identity().await;
                    let _ = ack.send(result);
                }
                Some(ClientCommand::Snapshot(ack)) => {
                    let _ = ack.send(task.snapshot());
                }
                Some(ClientCommand::Destroy(ack)) => {
                    task.close().await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    // Every handle dropped.
                    task.close().await;
                    break;
                }
            },
            _ = next_tick(&mut task.retry_timer) => task.on_retry_tick().await,
            _ = next_tick(&mut task.poll_timer) => task.on_poll_tick().await,
        }
    }

    tracing::debug!("control client stopped");
}

/// Resolves on the timer's next tick; never resolves for a stopped timer.
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn connect_and_negotiate(
    config: &ClientConfig,
) -> Result<(Connection, ProtocolInfo), ControlError> {
    let mut conn = Connection::connect(&config.addr, config.connect_timeout)
        .await?
        .with_read_timeout(config.read_timeout)
        .with_strict_status(config.strict_status_codes);

    match negotiator::negotiate(&mut conn, config.cookie_file.as_deref()).await {
        Ok(info) => Ok((conn, info)),
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    }
}

fn repeating(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl ClientTask {
    fn new(config: ClientConfig, event_tx: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            config,
            conn: None,
            state: ConnectionState::Closed,
            reason: None,
            protocol_info: None,
            poller: BootstrapPoller::new(),
            retry_timer: None,
            poll_timer: None,
            event_tx,
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::is_connected)
    }

    // -- Lifecycle ------------------------------------------------------------

    async fn open(&mut self) {
        if self.is_connected() {
            tracing::debug!("open: already connected");
            return;
        }

        tracing::info!(addr = %self.config.addr, "connecting to control port");
        match connect_and_negotiate(&self.config).await {
            Ok((conn, info)) => {
                self.conn = Some(conn);
                self.protocol_info = Some(info);
                self.poller.reset();
                self.set_state(ConnectionState::Ready, None);
                self.stop_retry();
                tracing::info!(addr = %self.config.addr, "connected to control port");
                self.start_poll().await;
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::Connection => {
                        tracing::info!("could not connect to control port: {e}")
                    }
                    ErrorKind::Protocol => tracing::warn!(
                        status = ?e.status_code(),
                        "control protocol error: {e}"
                    ),
                }
                self.drop_connection().await;
                self.enter_closed(Some(e.to_string()));
                self.start_retry();
            }
        }
    }

    async fn close(&mut self) {
        self.stop_retry();
        self.stop_poll();
        self.drop_connection().await;
        if self.state != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed, None);
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.protocol_info = None;
        self.poller.reset();
    }

    /// Peer went away (or a poll reply was bad enough to give up on).
    async fn lose_connection(&mut self, err: ControlError) {
        tracing::warn!("lost control connection: {err}");
        self.stop_poll();
        self.drop_connection().await;
        self.enter_closed(Some(err.to_string()));
        self.start_retry();
    }

    // -- Retry timer ----------------------------------------------------------

    fn start_retry(&mut self) {
        if !self.config.auto_retry || self.retry_timer.is_some() {
            return;
        }
        self.retry_timer = Some(repeating(self.config.retry_interval));
        tracing::info!(
            interval_ms = self.config.retry_interval.as_millis() as u64,
            "started auto retry"
        );
    }

    fn stop_retry(&mut self) {
        if self.retry_timer.take().is_some() {
            tracing::info!("stopping auto retry");
        }
    }

    async fn on_retry_tick(&mut self) {
        tracing::debug!("trying to reconnect");
        self.open().await;
        if self.is_connected() {
            self.stop_retry();
        }
    }

    // -- Poll timer -----------------------------------------------------------

    async fn start_poll(&mut self) {
        if self.poll_timer.is_some() {
            return;
        }
        tracing::debug!("starting bootstrap check");
        self.poll_once().await;
        if self.is_connected() {
            self.poll_timer = Some(repeating(self.config.poll_interval));
        }
    }

    fn stop_poll(&mut self) {
        if self.poll_timer.take().is_some() {
            tracing::debug!("stopping bootstrap check");
        }
    }

    async fn on_poll_tick(&mut self) {
        if !self.is_connected() {
            self.stop_poll();
            return;
        }
        self.poll_once().await;
    }

    async fn poll_once(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        match self.poller.poll(conn).await {
            Ok(Some(next)) => {
                let summary = self.poller.last().map(|s| s.summary.clone());
                self.set_state(next, summary);
            }
            Ok(None) => {}
            Err(e) if e.kind() == ErrorKind::Connection => self.lose_connection(e).await,
            Err(e) => match self.config.poll_error_policy {
                PollErrorPolicy::Report => {
                    tracing::warn!(status = ?e.status_code(), "bootstrap poll failed: {e}");
                    self.emit_protocol_error(&e);
                }
                PollErrorPolicy::Disconnect => self.lose_connection(e).await,
            },
        }
    }

    // -- Commands -------------------------------------------------------------

    async fn switch_identity(&mut self) -> Result<(), ControlError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(ControlError::connection("not connected to control port"));
        };

        let result = match conn.command(&Command::Signal(Signal::NewNym)).await {
            Ok(reply) => reply.expect_ok("could not switch Tor identity").map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!("switched to a new Tor identity");
                self.emit(ClientEvent::SwitchedIdentity);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::Connection => {
                self.lose_connection(e.clone()).await;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(status = ?e.status_code(), "{e}");
                self.emit_protocol_error(&e);
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state,
            reason: self.reason.clone(),
            bootstrap: self.poller.last().cloned(),
            protocol_info: self.protocol_info.clone(),
            retry_active: self.retry_timer.is_some(),
            poll_active: self.poll_timer.is_some(),
        }
    }

    // -- Events ---------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState, reason: Option<String>) {
        tracing::info!(
            from = self.state.as_str(),
            to = state.as_str(),
            reason = reason.as_deref().unwrap_or(""),
            "connection state changed"
        );
        self.state = state;
        self.reason = reason.clone();
        self.emit(ClientEvent::ConnectionStateChanged { state, reason });
    }

    /// Enter `Closed`, staying quiet if nothing observable changed (the
    /// same failure repeating on every retry).
    fn enter_closed(&mut self, reason: Option<String>) {
        if self.state == ConnectionState::Closed && self.reason == reason {
            tracing::debug!("still closed: {}", reason.as_deref().unwrap_or(""));
            return;
        }
        self.set_state(ConnectionState::Closed, reason);
    }

    fn emit_protocol_error(&self, err: &ControlError) {
        self.emit(ClientEvent::ProtocolError {
            message: err.to_string(),
            status: err.status_code(),
        });
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
