//! Bencode encoding and decoding (BEP-3)
//!
//! Bencode is the encoding used by BitTorrent for storing and transmitting
//! loosely structured data: tracker response bodies, extension protocol
//! messages, and the torrent metainfo itself.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix, info_span};
pub use encode::{encode, encode_into};
pub use error::BencodeError;
pub use value::Value;
