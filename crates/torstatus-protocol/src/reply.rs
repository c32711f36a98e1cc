//! Reply grammar -- `SSS<marker><payload>` lines folded into one logical reply.
//!
//! `SSS` is a three-digit decimal status code. A `-` marker means more lines
//! follow; any other marker (conventionally a space) ends the reply.

use crate::{ControlError, STATUS_OK};

/// One decoded reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub status: u16,
    pub is_continuation: bool,
    pub payload: String,
}

impl ReplyLine {
    /// True when `line` carries the `-` marker, even if the rest of it is
    /// malformed.
    pub fn continues(line: &str) -> bool {
        line.as_bytes().get(3) == Some(&b'-')
    }

    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let code = line
            .get(..3)
            .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                tracing::debug!(line, "rejected reply line");
                ControlError::protocol(format!("malformed reply line: {line:?}"), None)
            })?;
        let status: u16 = code.parse().map_err(|_| {
            ControlError::protocol(format!("malformed status code: {code:?}"), None)
        })?;

        let is_continuation = Self::continues(line);
        let payload = line.get(4..).unwrap_or_default().to_string();

        Ok(Self {
            status,
            is_continuation,
            payload,
        })
    }
}

/// A complete reply: status of the final line plus every payload in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Payload lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Pass a 250 reply through, turn anything else into a protocol error
    /// prefixed with `context`.
    pub fn expect_ok(self, context: &str) -> Result<Self, ControlError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ControlError::protocol(
                format!("{context}: {}", self.text()),
                Some(self.status),
            ))
        }
    }
}

/// Accumulates reply lines until the final one arrives.
///
/// With `strict_status` set, a line whose status differs from the first
/// line of the same reply is rejected. The daemon never does this, so the
/// default is lenient.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    strict_status: bool,
    status: Option<u16>,
    lines: Vec<String>,
}

impl ReplyAssembler {
    pub fn new(strict_status: bool) -> Self {
        Self {
            strict_status,
            ..Default::default()
        }
    }

    /// Feed one raw line. Returns the reply once its final line is seen.
    pub fn push_raw(&mut self, raw: &str) -> Result<Option<Reply>, ControlError> {
        let line = ReplyLine::parse(raw)?;
        self.push(line)
    }

    pub fn push(&mut self, line: ReplyLine) -> Result<Option<Reply>, ControlError> {
        if self.strict_status {
            if let Some(first) = self.status {
                if first != line.status {
                    tracing::debug!(first, status = line.status, "status code changed mid-reply");
                    self.reset();
                    return Err(ControlError::protocol(
                        format!(
                            "status code changed mid-reply: {first} then {}",
                            line.status
                        ),
                        Some(line.status),
                    ));
                }
            }
        }

        self.status.get_or_insert(line.status);
        self.lines.push(line.payload);

        if line.is_continuation {
            return Ok(None);
        }

        let reply = Reply {
            status: line.status,
            lines: std::mem::take(&mut self.lines),
        };
        self.reset();
        Ok(Some(reply))
    }

    pub fn reset(&mut self) {
        self.status = None;
        self.lines.clear();
    }
}
