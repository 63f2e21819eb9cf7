use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Longest decimal header we accept before the separating space. `u64::MAX` has 20 digits.
const MAX_HEADER_DIGITS: usize = 20;

const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// LineFrameCodec frames messages as `<decimal byte length><space><payload><newline>`.
///
/// The length counts payload bytes only, so a frame occupies `header + 1 + len + 1` bytes on the
/// wire. Payloads are opaque; they may even contain newlines.
#[derive(Debug, Clone)]
pub struct LineFrameCodec {
    max_frame_length: usize,
}

impl LineFrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        LineFrameCodec { max_frame_length }
    }

    /// Returns `(header_len, payload_len)` once the full header including its space is buffered.
    fn parse_header(&self, src: &BytesMut) -> Result<Option<(usize, usize)>, FrameError> {
        let mut space_at = None;
        for (position, byte) in src.iter().take(MAX_HEADER_DIGITS + 1).enumerate() {
            if *byte == b' ' {
                space_at = Some(position);
                break;
            }
            if !byte.is_ascii_digit() {
                return Err(FrameError::InvalidLengthHeader(
                    String::from_utf8_lossy(&src[..=position]).into_owned(),
                ));
            }
        }
        let space_at = match space_at {
            Some(position) => position,
            None if src.len() > MAX_HEADER_DIGITS => {
                return Err(FrameError::InvalidLengthHeader(
                    String::from_utf8_lossy(&src[..MAX_HEADER_DIGITS]).into_owned(),
                ))
            }
            None => return Ok(None),
        };

        let digits = &src[..space_at];
        if digits.is_empty() {
            return Err(FrameError::InvalidLengthHeader(String::new()));
        }

        // All ascii digits, so utf8 is guaranteed. Overflow is still possible at 20 digits.
        let payload_len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| FrameError::InvalidLengthHeader(String::from_utf8_lossy(digits).into_owned()))?;

        if payload_len > self.max_frame_length {
            return Err(FrameError::FrameTooLong {
                length: payload_len,
                max: self.max_frame_length,
            });
        }

        Ok(Some((space_at + 1, payload_len)))
    }
}

impl Default for LineFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineFrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (header_len, payload_len) = match self.parse_header(src)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let frame_len = header_len + payload_len + 1;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        if src[frame_len - 1] != b'\n' {
            return Err(FrameError::MissingTerminator);
        }

        src.advance(header_len);
        let payload = src.split_to(payload_len);
        src.advance(1);

        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for LineFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > self.max_frame_length {
            return Err(FrameError::FrameTooLong {
                length: payload.len(),
                max: self.max_frame_length,
            });
        }

        let header = payload.len().to_string();
        dst.reserve(header.len() + payload.len() + 2);
        dst.put_slice(header.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(&payload);
        dst.put_u8(b'\n');

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid frame length header {0:?}")]
    InvalidLengthHeader(String),
    #[error("Frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLong { length: usize, max: usize },
    #[error("Frame payload is not followed by a newline")]
    MissingTerminator,
}
