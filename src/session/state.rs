//! Upgrade negotiation state machine.

use crate::protocol::ProtocolVersion;

/// Where a connection is in the upgrade handshake.
///
/// `Idle -> Pending(version) -> Established(version)`, or `Failed` from
/// any state before `Established`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandshakeState {
    /// Request headers not inspected yet.
    #[default]
    Idle,
    /// Version selected, response not sent yet.
    Pending(ProtocolVersion),
    /// Negotiation failed; the transport is fast-closed.
    Failed,
    /// Response sent; the session loop may start.
    Established(ProtocolVersion),
}

impl HandshakeState {
    /// Whether the session loop may run.
    #[must_use]
    #[inline]
    pub const fn is_established(&self) -> bool {
        matches!(self, HandshakeState::Established(_))
    }

    /// The selected protocol version, once one has been chosen.
    #[must_use]
    #[inline]
    pub const fn version(&self) -> Option<ProtocolVersion> {
        match self {
            HandshakeState::Pending(v) | HandshakeState::Established(v) => Some(*v),
            HandshakeState::Idle | HandshakeState::Failed => None,
        }
    }

    /// Move to `Pending` after version selection.
    #[must_use]
    pub const fn select(self, version: ProtocolVersion) -> Self {
        match self {
            HandshakeState::Idle => HandshakeState::Pending(version),
            _ => HandshakeState::Failed,
        }
    }

    /// Move to `Established` once the response is on the wire.
    #[must_use]
    pub const fn establish(self) -> Self {
        match self {
            HandshakeState::Pending(v) => HandshakeState::Established(v),
            _ => HandshakeState::Failed,
        }
    }

    /// Move to `Failed` after an error. `Established` is final.
    #[must_use]
    pub const fn fail(self) -> Self {
        match self {
            HandshakeState::Established(v) => HandshakeState::Established(v),
            _ => HandshakeState::Failed,
        }
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeState::Idle => write!(f, "Idle"),
            HandshakeState::Pending(v) => write!(f, "Pending({})", v),
            HandshakeState::Failed => write!(f, "Failed"),
            HandshakeState::Established(v) => write!(f, "Established({})", v),
        }
    }
}
