//! Outbound frame encoding for both protocol generations.

use bytes::{BufMut, BytesMut};

use crate::message::Message;
use crate::protocol::ProtocolVersion;
use crate::protocol::hixie::{FRAME_END, FRAME_START};

const FIN: u8 = 0x80;

/// Bytes needed to encode `message` for `version`.
#[must_use]
pub fn encoded_len(message: &Message, version: ProtocolVersion) -> usize {
    let payload_len = message.payload().len();
    match version {
        ProtocolVersion::Hybi => 2 + extended_len_size(payload_len) + payload_len,
        ProtocolVersion::Hixie => payload_len + 2,
    }
}

#[inline]
const fn extended_len_size(payload_len: usize) -> usize {
    if payload_len <= 125 {
        0
    } else if payload_len <= 65535 {
        2
    } else {
        8
    }
}

/// Append the wire form of `message` to `buf`.
///
/// Hybi frames are sent with FIN set, RSV clear and no masking key.
/// Hixie frames wrap the payload in `0x00 .. 0xFF`; the message kind is
/// not represented.
pub fn encode(message: &Message, version: ProtocolVersion, buf: &mut BytesMut) {
    let payload = message.payload();
    buf.reserve(encoded_len(message, version));

    match version {
        ProtocolVersion::Hybi => {
            buf.put_u8(FIN | message.opcode().as_u8());
            match extended_len_size(payload.len()) {
                0 => buf.put_u8(payload.len() as u8),
                2 => {
                    buf.put_u8(126);
                    buf.put_u16(payload.len() as u16);
                }
                _ => {
                    buf.put_u8(127);
                    buf.put_u64(payload.len() as u64);
                }
            }
            buf.put_slice(payload);
        }
        ProtocolVersion::Hixie => {
            buf.put_u8(FRAME_START);
            buf.put_slice(payload);
            buf.put_u8(FRAME_END);
        }
    }
}

/// Encode `message` into a fresh vector.
#[must_use]
pub fn encode_to_vec(message: &Message, version: ProtocolVersion) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(encoded_len(message, version));
    encode(message, version, &mut buf);
    buf.to_vec()
}
