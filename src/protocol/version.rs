//! Protocol generation negotiated for a connection.

/// Wire protocol generation.
///
/// Selected once during the handshake and fixed for the connection's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// RFC 6455 binary framing.
    Hybi,
    /// Draft hixie-76 delimiter framing.
    Hixie,
}

impl ProtocolVersion {
    /// Whether a truncated inbound buffer can be completed by later reads.
    ///
    /// Hixie buffers are decoded as a whole; a partial one is a failure.
    #[inline]
    #[must_use]
    pub const fn resumes_partial_frames(&self) -> bool {
        matches!(self, ProtocolVersion::Hybi)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::Hybi => write!(f, "hybi"),
            ProtocolVersion::Hixie => write!(f, "hixie-76"),
        }
    }
}
