use std::fmt;

use sha1::{Digest, Sha1};

use super::error::MetainfoError;

/// A BitTorrent info hash: the 20-byte SHA-1 of the bencoded info dictionary.
///
/// This is the identity of a torrent across the network. Equality is
/// byte-exact; the textual forms (40-character hex, 32-character base32) are
/// only entry points.
///
/// # Examples
///
/// ```
/// use torrify::metainfo::InfoHash;
///
/// let hex = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
/// assert_eq!(hex.to_hex(), "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");
///
/// // Base32 and hex forms of the same digest compare equal
/// let b32 = InfoHash::from_base32("YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK").unwrap();
/// assert_eq!(hex, b32);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates an info hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Computes the info hash of raw info dictionary bytes.
    pub fn from_info_bytes(info_bytes: &[u8]) -> Self {
        let hash: [u8; 20] = Sha1::digest(info_bytes).into();
        Self(hash)
    }

    /// Parses an info hash from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, MetainfoError> {
        if s.len() != 40 {
            return Err(MetainfoError::InvalidInfoHash);
        }
        let bytes = hex_decode(s).ok_or(MetainfoError::InvalidInfoHash)?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Parses an info hash from a 32-character base32 string (RFC 4648
    /// alphabet, case-insensitive), the alternate form magnet links use.
    pub fn from_base32(s: &str) -> Result<Self, MetainfoError> {
        if s.len() != 32 {
            return Err(MetainfoError::InvalidInfoHash);
        }
        let bytes = base32_decode(s).ok_or(MetainfoError::InvalidInfoHash)?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes[..20]);
        Ok(Self(arr))
    }

    /// Parses either textual form, decided by length.
    pub fn parse(s: &str) -> Result<Self, MetainfoError> {
        match s.len() {
            40 => Self::from_hex(s),
            32 => Self::from_base32(s),
            _ => Err(MetainfoError::InvalidInfoHash),
        }
    }

    /// Returns the raw bytes of the info hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Converts to a lowercase hexadecimal string.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(40), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02x}", b);
                s
            })
    }

    /// Percent-encodes the raw hash bytes for tracker announce URLs.
    ///
    /// Every byte is encoded as `%xx`; the hash is binary, not UTF-8.
    pub fn url_encode(&self) -> String {
        percent_encode(&self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Percent-encodes arbitrary bytes, keeping only URL-safe ASCII literal.
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            use std::fmt::Write;
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let input = input.to_uppercase();
    let input = input.trim_end_matches('=');

    let mut output = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for c in input.chars() {
        let value = ALPHABET.iter().position(|&x| x == c as u8)? as u64;
        buffer = (buffer << 5) | value;
        bits_in_buffer += 5;

        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            output.push((buffer >> bits_in_buffer) as u8);
            buffer &= (1 << bits_in_buffer) - 1;
        }
    }

    Some(output)
}
