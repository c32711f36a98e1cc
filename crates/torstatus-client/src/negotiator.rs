//! Protocol negotiation -- PROTOCOLINFO, version check, cookie discovery, AUTHENTICATE.
//!
//! Each step aborts the whole negotiation on error. There is no retry here;
//! the client decides what to do with a failure.

use std::path::Path;

use torstatus_protocol::{cookie_hex, Command, ControlError, ProtocolInfo};

use crate::transport::Connection;

/// Run the full handshake on a fresh connection.
pub async fn negotiate(
    conn: &mut Connection,
    cookie_override: Option<&Path>,
) -> Result<ProtocolInfo, ControlError> {
    let info = query_protocol_info(conn).await?;
    tracing::debug!(
        version = info.version,
        methods = ?info.auth_methods,
        cookie_file = ?info.cookie_file,
        tor = info.tor_version.as_deref().unwrap_or("unknown"),
        "protocol info"
    );

    info.ensure_supported()?;
    authenticate(conn, &info, cookie_override).await?;
    Ok(info)
}

pub async fn query_protocol_info(conn: &mut Connection) -> Result<ProtocolInfo, ControlError> {
    let reply = conn
        .command(&Command::ProtocolInfo)
        .await?
        .expect_ok("could not read protocol info")?;
    ProtocolInfo::from_reply(&reply)
}

/// Read a cookie file and hex-encode its first 32 bytes.
pub async fn read_cookie(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(cookie_hex(&bytes))
}

/// Authenticate with the cookie if one can be read, otherwise with an
/// empty credential. The advertised cookie file is only used when the
/// daemon lists a cookie method; an explicit override is always tried.
async fn authenticate(
    conn: &mut Connection,
    info: &ProtocolInfo,
    cookie_override: Option<&Path>,
) -> Result<(), ControlError> {
    let advertised = info
        .cookie_file
        .as_deref()
        .filter(|_| info.accepts_cookie());
    let cookie_path = cookie_override.or(advertised);

    let secret = match cookie_path {
        Some(path) => match read_cookie(path).await {
            Ok(hex) => hex,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "could not read auth cookie, trying empty credential: {e}"
                );
                String::new()
            }
        },
        None => String::new(),
    };

    conn.command(&Command::Authenticate(secret))
        .await?
        .expect_ok("could not authenticate")?;
    Ok(())
}
