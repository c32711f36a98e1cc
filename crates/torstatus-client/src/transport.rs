//! Line transport -- owns the control socket, writes commands, reads reply lines.
//!
//! A clean peer shutdown is reported as `Ok(None)` from `read_line` and as
//! `ControlError::Disconnected` from `command`, never as a protocol error.
//!
//! Replies stay paired with their commands: a reply rejected partway through
//! is read to its final line before the error is returned, and bytes the
//! codec cannot frame end the connection.

use bytes::BytesMut;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use torstatus_protocol::{
    Command, ControlError, LineCodec, Reply, ReplyAssembler, ReplyLine, DEFAULT_CONTROL_HOST,
    DEFAULT_CONTROL_PORT,
};

/// Any byte stream the control protocol can run over.
pub trait ControlStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> ControlStream for T {}

/// Where the control port listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAddr {
    /// `host:port`.
    Tcp(String),
    Unix(PathBuf),
}

impl ControlAddr {
    pub fn tcp(host: &str, port: u16) -> Self {
        ControlAddr::Tcp(format!("{host}:{port}"))
    }
}

impl Default for ControlAddr {
    fn default() -> Self {
        ControlAddr::tcp(DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT)
    }
}

impl fmt::Display for ControlAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAddr::Tcp(addr) => f.write_str(addr),
            ControlAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A live control connection. Exclusively owned by one client.
pub struct Connection {
    stream: Option<Box<dyn ControlStream>>,
    codec: LineCodec,
    read_buf: BytesMut,
    read_timeout: Option<Duration>,
    strict_status: bool,
}

impl Connection {
    /// Dial the control port.
    pub async fn connect(addr: &ControlAddr, timeout: Duration) -> Result<Self, ControlError> {
        let dial = async {
            let stream: Box<dyn ControlStream> = match addr {
                ControlAddr::Tcp(hostport) => {
                    let stream = tokio::net::TcpStream::connect(hostport.as_str()).await?;
                    stream.set_nodelay(true)?;
                    Box::new(stream)
                }
                #[cfg(unix)]
                ControlAddr::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
                #[cfg(not(unix))]
                ControlAddr::Unix(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix sockets are not supported on this platform",
                    ))
                }
            };
            Ok::<_, std::io::Error>(stream)
        };

        let stream = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ControlError::connection(format!(
                    "could not connect to control port (Tor is not listening on {addr}): {e}"
                )))
            }
            Err(_) => {
                return Err(ControlError::connection(format!(
                    "timed out connecting to control port {addr}"
                )))
            }
        };

        tracing::debug!(%addr, "control socket connected");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: Box<dyn ControlStream>) -> Self {
        Self {
            stream: Some(stream),
            codec: LineCodec::new(),
            read_buf: BytesMut::with_capacity(4096),
            read_timeout: None,
            strict_status: false,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Write one line (terminator appended) and flush.
    pub async fn write_line(&mut self, text: &str) -> Result<(), ControlError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ControlError::connection("not connected to control port"))?;

        let mut buf = BytesMut::new();
        self.codec.encode(text, &mut buf)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Next line from the daemon, or `None` once the peer has closed.
    pub async fn read_line(&mut self) -> Result<Option<String>, ControlError> {
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => {}
                Err(e) => return Err(self.framing_lost(e)),
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| ControlError::connection("not connected to control port"))?;

            let read = stream.read_buf(&mut self.read_buf);
            let n = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                    ControlError::connection(format!(
                        "no reply from control port within {}ms",
                        limit.as_millis()
                    ))
                })??,
                None => read.await?,
            };

            if n == 0 {
                let tail = match self.codec.decode_eof(&mut self.read_buf) {
                    Ok(tail) => tail,
                    Err(e) => return Err(self.framing_lost(e)),
                };
                if tail.is_none() {
                    self.stream = None;
                }
                return Ok(tail);
            }
        }
    }

    /// The stream no longer frames into reply lines; nothing after this
    /// point can be matched to a command.
    fn framing_lost(&mut self, err: ControlError) -> ControlError {
        tracing::warn!("dropping control connection: {err}");
        self.stream = None;
        self.read_buf.clear();
        self.codec = LineCodec::new();
        ControlError::connection(format!("unreadable reply from control port: {err}"))
    }

    /// Send a command and read lines until its reply is complete.
    pub async fn command(&mut self, command: &Command) -> Result<Reply, ControlError> {
        tracing::debug!(command = command.name(), "sending control command");
        self.write_line(&command.to_string()).await?;

        let mut assembler = ReplyAssembler::new(self.strict_status);
        loop {
            let Some(raw) = self.read_line().await? else {
                return Err(ControlError::Disconnected);
            };
            match assembler.push_raw(&raw) {
                Ok(Some(reply)) => {
                    tracing::debug!(
                        command = command.name(),
                        status = reply.status,
                        lines = reply.lines.len(),
                        "control reply"
                    );
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(e) => {
                    if ReplyLine::continues(&raw) {
                        self.skip_reply().await?;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Read and drop lines through the final line of the current reply.
    async fn skip_reply(&mut self) -> Result<(), ControlError> {
        loop {
            let Some(raw) = self.read_line().await? else {
                return Err(ControlError::Disconnected);
            };
            tracing::debug!(line = %raw, "discarding rest of rejected reply");
            if !ReplyLine::continues(&raw) {
                return Ok(());
            }
        }
    }

    /// Shut the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!("control socket shutdown: {e}");
            }
        }
        self.read_buf.clear();
    }
}
