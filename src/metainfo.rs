//! Torrent metainfo handling (BEP-3, BEP-9)
//!
//! This module handles magnet links, info hashes, and composition of
//! `.torrent` files around a fetched info dictionary.

mod error;
mod info_hash;
mod magnet;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::{percent_encode, InfoHash};
pub use magnet::MagnetLink;
pub use torrent::{torrent_file_name, validate_template, TorrentFile};
