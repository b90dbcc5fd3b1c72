use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The magnet URI is malformed or missing a usable `xt` parameter.
    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),

    /// An info hash string is not 40 hex or 32 base32 characters.
    #[error("invalid info hash")]
    InvalidInfoHash,

    /// The fetched info dictionary is not valid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
