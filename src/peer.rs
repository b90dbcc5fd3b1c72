//! Peer wire protocol (BEP-3, BEP-6, BEP-10) and metadata exchange (BEP-9)
//!
//! This module implements the client side of the peer wire protocol as far
//! as a metadata fetch needs it: handshake, message framing, the extension
//! protocol, and the ut_metadata exchange that downloads the info dictionary.

mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod session;
mod transport;

pub use error::PeerError;
pub use extension::ExtensionHandshake;
pub use message::{Handshake, Message, MessageId};
pub use metadata::{MetadataBuffer, MetadataMessage, MetadataMessageType};
pub use peer_id::PeerId;
pub use session::{PeerSession, SessionConfig, SessionState};
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
