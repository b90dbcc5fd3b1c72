use std::fmt;

use rand::Rng;

use crate::constants::CLIENT_PREFIX;

/// A 20-byte peer ID in the Azureus convention: `-TF0001-` followed by
/// twelve random bytes. It has no meaning beyond uniqueness at the peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Generates a peer ID from the process RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generates a peer ID from a caller-supplied RNG, so tests can pin the
    /// random tail.
    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; 20];
        let prefix = CLIENT_PREFIX.as_bytes();
        id[..prefix.len()].copy_from_slice(prefix);
        rng.fill(&mut id[prefix.len()..]);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 20 {
            return None;
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The client identifier between the dashes, when the ID follows the
    /// Azureus convention.
    pub fn client_id(&self) -> Option<&str> {
        if self.0[0] == b'-' && self.0[7] == b'-' {
            std::str::from_utf8(&self.0[1..7]).ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(client) = self.client_id() {
            write!(f, "PeerId({})", client)
        } else {
            write!(f, "PeerId({:02x?})", &self.0[..8])
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            if byte.is_ascii_alphanumeric() || *byte == b'-' {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "%{:02x}", byte)?;
            }
        }
        Ok(())
    }
}
