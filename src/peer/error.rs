use thiserror::Error;

/// Errors that can occur during a peer session.
///
/// All of these are non-fatal to the overall fetch: the coordinator records
/// the failure and moves on to the next peer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// TCP connect failed or was refused.
    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    /// Network I/O error after the connection was established.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed handshake, the wrong info hash, or lacks
    /// the extension protocol.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message ID.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation or session deadline expired.
    #[error("timeout")]
    Timeout,

    /// Protocol violation by the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Extension protocol error (missing ut_metadata, bad metadata_size, ...).
    #[error("extension error: {0}")]
    Extension(String),

    /// The peer rejected a metadata piece request twice.
    #[error("metadata piece {piece} rejected")]
    MetadataReject { piece: u32 },

    /// The assembled metadata does not hash to the magnet's info hash.
    #[error("info hash mismatch on assembled metadata")]
    HashMismatch,

    /// Error decoding bencode in extension messages.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}

impl PeerError {
    /// Whether the peer actively served bad data (as opposed to being
    /// unreachable or merely unhelpful). Used to mark peers hostile.
    pub fn is_hostile(&self) -> bool {
        matches!(self, PeerError::HashMismatch)
    }
}
