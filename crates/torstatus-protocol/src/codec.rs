//! Newline-delimited text codec for the control socket.
//!
//! Wire format: UTF-8 text, one line per frame, terminated by `\n`
//! (a preceding `\r` is stripped on decode).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ControlError;

/// Maximum accepted line length: 64 KB (replies are short status lines).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Codec for framing control-protocol lines over a byte stream.
///
/// An oversized line is reported once and then skipped through its
/// terminator, so the lines after it still frame correctly.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes already scanned for a newline in the current frame.
    next_index: usize,
    /// Dropping the tail of an oversized line until its `\n`.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn into_line(mut bytes: BytesMut) -> Result<String, ControlError> {
    if bytes.last() == Some(&b'\r') {
        bytes.truncate(bytes.len() - 1);
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ControlError::protocol("reply line is not valid UTF-8", None))
}

fn too_long(len: usize) -> ControlError {
    ControlError::protocol(
        format!("reply line too long: {len} bytes (max {MAX_LINE_LENGTH})"),
        None,
    )
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ControlError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = src.split_to(end);
                    src.advance(1);
                    if end > MAX_LINE_LENGTH {
                        return Err(too_long(end));
                    }
                    return into_line(line).map(Some);
                }
                (false, None) if src.len() > MAX_LINE_LENGTH => {
                    let len = src.len();
                    src.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Err(too_long(len));
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        self.discarding = false;
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated trailing line at peer shutdown.
        let rest = src.split_to(src.len());
        into_line(rest).map(Some)
    }
}

impl<'a> Encoder<&'a str> for LineCodec {
    type Error = ControlError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(['\r', '\n']) {
            return Err(ControlError::protocol(
                "command must not contain line terminators",
                None,
            ));
        }

        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
