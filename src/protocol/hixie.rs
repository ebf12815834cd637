//! Hixie-76 inbound frame decoding.
//!
//! A data frame is a `0x00` byte, the payload, and a terminating `0xFF`.
//! The closing handshake is the two bytes `0xFF 0x00`. The buffer is
//! decoded as a whole: a frame cut short by the end of the buffer is a
//! failure, not a reason to wait.

use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Start-of-frame marker.
pub const FRAME_START: u8 = 0x00;

/// End-of-frame marker.
pub const FRAME_END: u8 = 0xFF;

/// Decode every frame in `buf`.
///
/// Data frames come back as [`OpCode::Text`]; a closing handshake comes
/// back as a close frame. An empty buffer decodes to no frames.
///
/// # Errors
///
/// Returns `Error::DecodeFailure` if a frame is missing its `0xFF`
/// terminator or does not start with a marker byte.
pub fn decode(buf: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = buf;

    while let Some((&marker, body)) = rest.split_first() {
        match marker {
            FRAME_START => {
                let end = body
                    .iter()
                    .position(|&b| b == FRAME_END)
                    .ok_or_else(|| Error::decode("hixie frame missing 0xFF terminator"))?;
                frames.push(Frame::new(OpCode::Text, body[..end].to_vec()));
                rest = &body[end + 1..];
            }
            FRAME_END if body.first() == Some(&FRAME_START) => {
                frames.push(Frame::close());
                rest = &body[1..];
            }
            other => {
                return Err(Error::decode(format!(
                    "unexpected hixie frame marker {:#04x}",
                    other
                )));
            }
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_frame() {
        let frames = decode(&[0x00, b'a', b'b', b'c', 0xff]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload(), b"abc");
    }

    #[test]
    fn test_missing_terminator_is_failure() {
        let result = decode(&[0x00, b'a', b'b', b'c']);
        assert!(matches!(result, Err(Error::DecodeFailure(_))));
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let data = b"\x00one\xff\x00two\xff\x00\xff";
        let frames = decode(data).unwrap();
        let payloads: Vec<&[u8]> = frames.iter().map(Frame::payload).collect();
        assert_eq!(payloads, vec![&b"one"[..], &b"two"[..], &b""[..]]);
    }

    #[test]
    fn test_trailing_partial_frame_fails_whole_batch() {
        let data = b"\x00one\xff\x00tw";
        assert!(decode(data).is_err());
    }

    #[test]
    fn test_empty_buffer_has_no_frames() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_marker_is_failure() {
        assert!(decode(b"hello\xff").is_err());
        assert!(decode(&[0xff]).is_err());
        assert!(decode(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_closing_handshake_decodes_to_close() {
        let frames = decode(b"\x00bye\xff\xff\x00").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload(), b"bye");
        assert!(frames[1].is_close());
    }

    #[test]
    fn test_payload_may_contain_nul() {
        let frames = decode(&[0x00, b'a', 0x00, b'b', 0xff]).unwrap();
        assert_eq!(frames[0].payload(), &[b'a', 0x00, b'b']);
    }
}
