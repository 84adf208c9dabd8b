//! Length-prefixed framing: `<decimal byte length>#<utf-8 json>`.
//!
//! Frames follow each other back to back with no delimiter beyond the next
//! length prefix. The length counts payload bytes, not characters.
//!
//! Decoding is incremental over a per-connection [`BytesMut`]: a read may
//! yield zero, one, or many frames, and an incomplete frame leaves the
//! buffer untouched until more bytes arrive. Two classes of failure exist:
//!
//! - [`FrameError`]: the length prefix is unusable. The stream can no longer
//!   be trusted, so the caller is expected to drop the connection.
//! - [`PayloadError`]: the frame was well delimited but its payload is not a
//!   valid packet. The frame is consumed and decoding continues.

use bytes::{BufMut, BytesMut};

use crate::messages::{Packet, PayloadError};

/// Separator between the length prefix and the payload.
pub const SEPARATOR: u8 = b'#';

/// Longest accepted length prefix, in digits.
///
/// `u64::MAX` has 20 digits, so nothing longer is a valid length.
pub const MAX_PREFIX_LEN: usize = 20;

/// Default cap on a single payload, in bytes.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Fatal framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid length prefix {prefix:?}")]
    InvalidLength { prefix: String },
    #[error("frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge { length: usize, max: usize },
}

/// Outcome of decoding one complete frame.
pub type Decoded = Result<Packet, PayloadError>;

/// Stateless decoder; all state lives in the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_length: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Decodes at most one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed (the buffer is left
    /// as-is), or `Ok(Some(decoded))` after removing exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidLength`] if the prefix holds anything
    /// other than ASCII digits, is empty, or runs past [`MAX_PREFIX_LEN`]
    /// without a separator. Returns [`FrameError::FrameTooLarge`] if the
    /// declared length exceeds the configured maximum.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Decoded>, FrameError> {
        let Some(separator) = buf.iter().position(|byte| *byte == SEPARATOR) else {
            // Reject garbage early rather than waiting for a separator that
            // would never make the prefix valid.
            if buf.len() > MAX_PREFIX_LEN || !buf.iter().all(u8::is_ascii_digit) {
                return Err(invalid_prefix(&buf[..buf.len().min(MAX_PREFIX_LEN + 1)]));
            }
            return Ok(None);
        };

        let length = parse_length(&buf[..separator])?;
        if length > self.max_frame_length {
            return Err(FrameError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }

        let start = separator + 1;
        let end = start + length;
        if buf.len() < end {
            buf.reserve(end - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(end);
        Ok(Some(Packet::from_slice(&frame[start..])))
    }

    /// Decodes every complete frame currently in `buf`.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first [`FrameError`]; frames decoded before
    /// it are lost to the caller, matching a connection teardown.
    pub fn decode_all(&self, buf: &mut BytesMut) -> Result<Vec<Decoded>, FrameError> {
        let mut out = Vec::new();
        while let Some(decoded) = self.decode(buf)? {
            out.push(decoded);
        }
        Ok(out)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

fn parse_length(prefix: &[u8]) -> Result<usize, FrameError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !prefix.iter().all(u8::is_ascii_digit)
    {
        return Err(invalid_prefix(prefix));
    }
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| invalid_prefix(prefix))
}

fn invalid_prefix(prefix: &[u8]) -> FrameError {
    FrameError::InvalidLength {
        prefix: String::from_utf8_lossy(prefix).into_owned(),
    }
}

/// Appends one encoded frame for `packet` to `dst`.
///
/// The prefix and payload land in one contiguous region so the writer can
/// flush them with a single write.
///
/// # Errors
///
/// Returns an error if the packet cannot be serialized to JSON.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<(), serde_json::Error> {
    let payload = serde_json::to_vec(packet)?;
    let prefix = payload.len().to_string();

    dst.reserve(prefix.len() + 1 + payload.len());
    dst.put_slice(prefix.as_bytes());
    dst.put_u8(SEPARATOR);
    dst.put_slice(&payload);
    Ok(())
}

/// Encodes one frame into a fresh buffer.
///
/// # Errors
///
/// Returns an error if the packet cannot be serialized to JSON.
pub fn encode_to_vec(packet: &Packet) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = BytesMut::new();
    encode_packet(packet, &mut buf)?;
    Ok(buf.to_vec())
}
