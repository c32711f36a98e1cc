//! torstatus -- watch a local Tor daemon over its control port.
//!
//! Usage:
//!   torstatus                          # Watch bootstrap state until Ctrl-C
//!   torstatus --config path.toml       # Use a custom config file
//!   torstatus status --json            # One-shot status as JSON
//!   torstatus newnym                   # Switch to a new identity

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use torstatus::config::Config;
use torstatus::notifier::Notifier;
use torstatus::{expand_tilde, DEFAULT_CONFIG_PATH};
use torstatus_client::{ClientEvent, ClientSnapshot, ControlAddr, ControlClient};

#[derive(Parser)]
#[command(name = "torstatus", about = "Tor control port status watcher")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Control port host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Control port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Unix control socket (overrides host and port)
    #[arg(long)]
    socket: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch connection and bootstrap state (default)
    Watch,
    /// Connect once and print the current state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask Tor for a new identity
    Newnym,
    /// Print the negotiated PROTOCOLINFO
    ProtocolInfo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_path = expand_tilde(&cli.config);
    let mut cfg = Config::load_or_default(&config_path)?;
    if let Some(host) = cli.host {
        cfg.control.host = host;
    }
    if let Some(port) = cli.port {
        cfg.control.port = port;
    }
    if cli.socket.is_some() {
        cfg.control.socket = cli.socket;
    }

    match cli.command {
        Some(Commands::Watch) | None => watch(&cfg).await?,
        Some(Commands::Status { json }) => status(&cfg, json).await?,
        Some(Commands::Newnym) => newnym(&cfg).await?,
        Some(Commands::ProtocolInfo) => protocol_info(&cfg).await?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "torstatus=info,torstatus_client=info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn watch(cfg: &Config) -> anyhow::Result<()> {
    let client_config = cfg.client_config();
    tracing::info!(
        addr = %client_config.addr,
        auto_retry = client_config.auto_retry,
        version = env!("CARGO_PKG_VERSION"),
        "starting torstatus"
    );

    let client = ControlClient::spawn(client_config);
    let mut events = client.subscribe();
    let mut notifier = Notifier::new();
    client.open().await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => on_event(&mut notifier, &event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    client.destroy().await;
    Ok(())
}

fn on_event(notifier: &mut Notifier, event: &ClientEvent) {
    match event {
        ClientEvent::ConnectionStateChanged { state, reason } => {
            tracing::info!(%state, reason = reason.as_deref().unwrap_or(""), "connection state");
        }
        ClientEvent::ProtocolError { message, status } => {
            tracing::warn!(%message, status = ?status, "protocol error");
        }
        ClientEvent::SwitchedIdentity => tracing::info!("switched identity"),
    }
    if let Some(message) = notifier.handle(event) {
        println!("{message}");
    }
}

/// Open a client without auto-retry and return it with its first snapshot.
async fn connect_once(cfg: &Config) -> anyhow::Result<(ControlClient, ClientSnapshot)> {
    let mut client_config = cfg.client_config();
    client_config.auto_retry = false;
    let addr: ControlAddr = client_config.addr.clone();

    let client = ControlClient::spawn(client_config);
    client.open().await?;
    let snapshot = client.snapshot().await?;

    if !snapshot.state.is_connected() {
        client.destroy().await;
        anyhow::bail!(
            "could not connect to {addr}: {}",
            snapshot.reason.as_deref().unwrap_or("unknown error")
        );
    }
    Ok((client, snapshot))
}

async fn status(cfg: &Config, json: bool) -> anyhow::Result<()> {
    let (client, snapshot) = connect_once(cfg).await?;
    client.destroy().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("State: {}", snapshot.state);
    if let Some(info) = &snapshot.protocol_info {
        println!(
            "Tor version: {}",
            info.tor_version.as_deref().unwrap_or("(unknown)")
        );
    }
    match &snapshot.bootstrap {
        Some(b) => println!("Bootstrap: {}% ({})", b.percent, b.summary),
        None => println!("Bootstrap: (unknown)"),
    }
    Ok(())
}

async fn newnym(cfg: &Config) -> anyhow::Result<()> {
    let (client, snapshot) = connect_once(cfg).await?;
    if !snapshot.state.can_switch_identity() {
        client.destroy().await;
        let progress = snapshot
            .bootstrap
            .map(|b| format!(" ({}%: {})", b.percent, b.summary))
            .unwrap_or_default();
        anyhow::bail!(
            "Tor is not bootstrapped yet, state {}{progress}",
            snapshot.state
        );
    }
    let result = client.switch_identity().await;
    client.destroy().await;

    result?;
    println!("{}", torstatus::notifier::MSG_SWITCHED);
    Ok(())
}

async fn protocol_info(cfg: &Config) -> anyhow::Result<()> {
    let (client, snapshot) = connect_once(cfg).await?;
    client.destroy().await;

    let info = snapshot
        .protocol_info
        .ok_or_else(|| anyhow::anyhow!("no protocol info negotiated"))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
