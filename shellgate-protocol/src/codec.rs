//! Framing codec for stream transports
//!
//! Stream transports (TCP) carry one control message per line in the
//! client-to-server direction. Server-to-client output is unframed and is
//! written through untouched.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::ProtocolError;

/// Maximum control line length (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Newline-delimited control frames in, raw output bytes out
#[derive(Debug, Clone)]
pub struct ControlLineCodec {
    max_length: usize,
    /// Offset up to which the buffer is known not to contain a newline
    next_index: usize,
}

impl ControlLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for ControlLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlLineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if src.len() > self.max_length {
                    return Err(ProtocolError::FrameTooLong {
                        len: src.len(),
                        max: self.max_length,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;

            if end > self.max_length {
                return Err(ProtocolError::FrameTooLong {
                    len: end,
                    max: self.max_length,
                });
            }

            let line = src.split_to(end + 1);
            let line = &line[..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            // Blank lines are keep-alives
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let text = std::str::from_utf8(line)
                .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {}", e)))?;
            return Ok(Some(text.to_string()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // Trailing data without a newline is treated as a final frame
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        self.next_index = 0;
        let rest = src.split();
        let text = std::str::from_utf8(&rest)
            .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {}", e)))?;
        Ok(Some(text.trim_end_matches('\r').to_string()))
    }
}

impl Encoder<Bytes> for ControlLineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
