//! Test harness -- an in-process fake control daemon on a loopback socket.
//!
//! `FakeDaemon` answers the four commands the client uses from a shared,
//! mutable `Script`, records every command line it receives, and can hang up
//! on demand to exercise the disconnect path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use torstatus_client::{ClientConfig, ClientEvent, ControlAddr, ControlClient, ConnectionState};

pub const NULL_AUTH_PROTOCOLINFO: &str =
    "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=NULL\r\n250-VERSION Tor=\"0.4.8.9\"\r\n250 OK\r\n";

/// What the daemon does with one GETINFO status/bootstrap-phase.
#[derive(Debug, Clone)]
pub enum Action {
    Reply(String),
    Hangup,
}

/// Bootstrap-phase reply for `percent`.
pub fn bootstrap(percent: u8, summary: &str) -> Action {
    Action::Reply(format!(
        "250-status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS={percent} TAG=phase SUMMARY=\"{summary}\"\r\n250 OK\r\n"
    ))
}

#[derive(Debug, Clone)]
pub struct Script {
    pub protocol_info: String,
    pub authenticate: String,
    /// Consumed front to back; the last entry repeats forever.
    pub bootstrap: VecDeque<Action>,
    pub newnym: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            protocol_info: NULL_AUTH_PROTOCOLINFO.into(),
            authenticate: "250 OK\r\n".into(),
            bootstrap: VecDeque::from([bootstrap(100, "Done")]),
            newnym: "250 OK\r\n".into(),
        }
    }
}

impl Script {
    fn next_bootstrap(&mut self) -> Action {
        if self.bootstrap.len() > 1 {
            self.bootstrap.pop_front().unwrap_or(Action::Hangup)
        } else {
            self.bootstrap.front().cloned().unwrap_or(Action::Hangup)
        }
    }
}

pub struct FakeDaemon {
    pub addr: ControlAddr,
    pub script: Arc<Mutex<Script>>,
    pub received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl FakeDaemon {
    pub async fn start(script: Script) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = ControlAddr::Tcp(listener.local_addr()?.to_string());
        let script = Arc::new(Mutex::new(script));
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let script = script.clone();
            let received = received.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let script = script.clone();
                    let received = received.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();

                        while let Ok(Some(line)) = lines.next_line().await {
                            received.lock().await.push(line.clone());
                            let action = {
                                let mut script = script.lock().await;
                                if line == "PROTOCOLINFO" {
                                    Action::Reply(script.protocol_info.clone())
                                } else if line.starts_with("AUTHENTICATE") {
                                    Action::Reply(script.authenticate.clone())
                                } else if line == "GETINFO status/bootstrap-phase" {
                                    script.next_bootstrap()
                                } else if line == "SIGNAL NEWNYM" {
                                    Action::Reply(script.newnym.clone())
                                } else {
                                    Action::Reply("510 Unrecognized command\r\n".into())
                                }
                            };

                            match action {
                                Action::Reply(text) => {
                                    if write.write_all(text.as_bytes()).await.is_err() {
                                        break;
                                    }
                                }
                                Action::Hangup => break,
                            }
                        }
                    });
                }
            })
        };

        Ok(Self {
            addr,
            script,
            received,
            connections,
            handle,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    /// Client config pointed at this daemon with fast timers.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.addr.clone(),
            retry_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(30),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        }
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Wait for the first event matching `pred`, collecting everything seen.
pub async fn wait_event(
    rx: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    pred: impl Fn(&ClientEvent) -> bool,
) -> anyhow::Result<Vec<ClientEvent>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return Ok(seen);
                }
            }
            Ok(Err(e)) => anyhow::bail!("event channel error: {e}"),
            Err(_) => anyhow::bail!("timeout waiting for event; saw {seen:?}"),
        }
    }
}

/// Poll snapshots until the client reaches `state`.
pub async fn wait_state(
    client: &ControlClient,
    state: ConnectionState,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snap = client.snapshot().await?;
        if snap.state == state {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timeout waiting for {state}; still {}", snap.state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn is_state(event: &ClientEvent, want: ConnectionState) -> bool {
    matches!(event, ClientEvent::ConnectionStateChanged { state, .. } if *state == want)
}

pub fn states(events: &[ClientEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::ConnectionStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}
