//! Hybi (RFC 6455) inbound frame decoding.
//!
//! [`decode`] works on a buffer as a whole: it either decodes every frame
//! in it, or reports that the buffer ends mid-frame. The session uses
//! [`decode_available`] instead, which also hands back the complete frames
//! in front of a truncated one so a retry only looks at the new tail.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Reserved top bit of the 64-bit extended payload length.
const LEN64_RESERVED_BIT: u64 = 1 << 63;

const UNBOUNDED: Limits = Limits::new(usize::MAX, usize::MAX);

/// A decoded frame: opcode plus unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Create an empty close frame.
    #[must_use]
    pub fn close() -> Self {
        Self::new(OpCode::Close, Vec::new())
    }

    /// Check if this frame signals connection close.
    #[inline]
    #[must_use]
    pub fn is_close(&self) -> bool {
        self.opcode.is_close()
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// How many more bytes a truncated buffer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needed {
    /// The header is complete and this many payload bytes are missing.
    Exactly(usize),
    /// The header itself is truncated, so the frame size is not known yet.
    Unknown,
}

/// Complete frames from the front of a buffer and where decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    /// Frames decoded, in arrival order.
    pub frames: Vec<Frame>,
    /// Bytes taken up by `frames`.
    pub consumed: usize,
    /// Set when the bytes after `consumed` end mid-frame.
    pub needed: Option<Needed>,
}

/// Outcome of a decode pass over the pending buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Every byte was consumed; frames are in arrival order.
    Frames(Vec<Frame>),
    /// The buffer ends mid-frame. Nothing was consumed.
    Incomplete(Needed),
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    opcode: OpCode,
    mask: [u8; 4],
    payload_len: usize,
    header_len: usize,
}

/// Read a frame header from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` is too short to hold the length and mask
/// fields the first two bytes announce.
///
/// Layout, most significant bit first:
///
/// ```text
///  0               1               2 ..
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| len (7)     | ext len (0, 16 or 64 bits)    |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// | masking key (32 bits)         | payload ...                   |
/// +-------------------------------+-------------------------------+
/// ```
///
/// FIN, RSV and the MASK flag are not interpreted: client frames always
/// carry a masking key.
fn parse_header(buf: &[u8], limits: &Limits) -> Result<Option<FrameHeader>> {
    let [byte0, byte1, rest @ ..] = buf else {
        return Ok(None);
    };

    let opcode = OpCode::from_u8(byte0 & 0x0F);
    let indicator = byte1 & 0x7F;

    let (declared_len, len_field) = match indicator {
        0..=125 => (u64::from(indicator), 0),
        126 => match rest {
            [hi, lo, ..] => (u64::from(u16::from_be_bytes([*hi, *lo])), 2),
            _ => return Ok(None),
        },
        _ => match rest.first_chunk::<8>() {
            Some(bytes) => {
                let len = u64::from_be_bytes(*bytes);
                if len & LEN64_RESERVED_BIT != 0 {
                    return Err(Error::decode(
                        "reserved bit set in 64-bit payload length",
                    ));
                }
                (len, 8)
            }
            None => return Ok(None),
        },
    };

    let Some(mask) = rest[len_field..].first_chunk::<4>().copied() else {
        return Ok(None);
    };

    limits.check_frame_size(declared_len)?;
    let payload_len = usize::try_from(declared_len).map_err(|_| Error::FrameTooLarge {
        size: declared_len,
        max: limits.max_frame_size,
    })?;

    Ok(Some(FrameHeader {
        opcode,
        mask,
        payload_len,
        header_len: 2 + len_field + 4,
    }))
}

/// Decode every frame in `buf` with no frame size limit.
///
/// # Errors
///
/// See [`decode_with_limit`].
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    decode_with_limit(buf, &UNBOUNDED)
}

/// Decode every frame in `buf`, rejecting declared payloads larger than
/// `limits.max_frame_size`.
///
/// If the buffer ends mid-frame the whole pass reports
/// [`Decoded::Incomplete`] and the caller retries from the same start once
/// more bytes are appended.
///
/// # Errors
///
/// - `Error::DecodeFailure` if `buf` is empty or a 64-bit length has its
///   reserved bit set
/// - `Error::FrameTooLarge` if a declared length exceeds the limit or the
///   platform's address space
pub fn decode_with_limit(buf: &[u8], limits: &Limits) -> Result<Decoded> {
    if buf.is_empty() {
        return Err(Error::decode("empty buffer"));
    }

    let progress = decode_available(buf, limits)?;
    Ok(match progress.needed {
        Some(needed) => Decoded::Incomplete(needed),
        None => Decoded::Frames(progress.frames),
    })
}

/// Decode the complete frames at the front of `buf`.
///
/// Frames are extracted front to back. Decoding stops at the first frame
/// that does not fit in the remaining bytes; `consumed` marks where it
/// starts and `needed` says how much more it wants. An empty buffer yields
/// no frames and nothing needed.
///
/// # Errors
///
/// Same as [`decode_with_limit`], apart from the empty buffer case.
pub fn decode_available(buf: &[u8], limits: &Limits) -> Result<Progress> {
    let mut progress = Progress::default();

    while progress.consumed < buf.len() {
        let rest = &buf[progress.consumed..];
        let Some(header) = parse_header(rest, limits)? else {
            progress.needed = Some(Needed::Unknown);
            break;
        };

        let available = rest.len() - header.header_len;
        if available < header.payload_len {
            progress.needed = Some(Needed::Exactly(header.payload_len - available));
            break;
        }

        let frame_len = header.header_len + header.payload_len;
        let mut payload = rest[header.header_len..frame_len].to_vec();
        apply_mask(&mut payload, header.mask);

        log::trace!(
            "decoded hybi frame: opcode={}, len={}",
            header.opcode,
            header.payload_len
        );
        progress.frames.push(Frame::new(header.opcode, payload));
        progress.consumed += frame_len;
    }

    Ok(progress)
}

/// Check whether a decoded batch contains a close frame.
#[must_use]
pub fn contains_close(frames: &[Frame]) -> bool {
    frames.iter().any(Frame::is_close)
}
