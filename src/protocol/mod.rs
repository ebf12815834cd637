//! WebSocket wire protocol for hybi (RFC 6455) and hixie-76 peers.

pub mod encode;
pub mod frame;
pub mod handshake;
pub mod hixie;
pub mod mask;
pub mod opcode;
pub mod version;

pub use frame::{Decoded, Frame, Needed, Progress};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, Headers, Scheme, WS_GUID, compute_accept_key,
    compute_hixie_challenge, select_version,
};
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use version::ProtocolVersion;
