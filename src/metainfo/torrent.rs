use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode_into, Value};
use crate::constants::CLIENT;

/// A `.torrent` file composed around fetched raw info bytes.
///
/// The info dictionary is carried verbatim: its bytes were validated against
/// the magnet's info hash and re-encoding them could change them (bencode
/// round-trips only canonical input). Composition splices the raw slice into
/// the outer dictionary at the right key position.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    /// The raw, validated info dictionary bytes.
    pub info: Bytes,
    /// Tracker URLs, in magnet-link order. The first becomes `announce`,
    /// every one becomes a single-member tier in `announce-list`.
    pub trackers: Vec<String>,
    /// Client string for the `created by` field.
    pub created_by: String,
    /// Unix timestamp for the `creation date` field.
    pub creation_date: i64,
}

impl TorrentFile {
    /// Composes a torrent file from raw info bytes and a tracker list,
    /// stamped with the current time and this client's name.
    pub fn compose(info: Bytes, trackers: Vec<String>) -> Self {
        let creation_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            info,
            trackers,
            created_by: CLIENT.to_string(),
            creation_date,
        }
    }

    /// Returns the `name` field of the info dictionary, if present and UTF-8.
    pub fn name(&self) -> Option<String> {
        let value = decode(&self.info).ok()?;
        value.str_field(b"name").map(String::from)
    }

    /// Computes the info hash of the carried info bytes.
    pub fn info_hash(&self) -> InfoHash {
        InfoHash::from_info_bytes(&self.info)
    }

    /// Serialises the complete metainfo dictionary.
    ///
    /// Keys are emitted in canonical sorted order; the info value is the raw
    /// fetched bytes, never re-encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MetainfoError> {
        // Emitted keys in sorted order:
        // announce, announce-list, created by, creation date, info
        let mut buf = Vec::with_capacity(self.info.len() + 256);
        buf.push(b'd');

        if let Some(first) = self.trackers.first() {
            write_key(&mut buf, b"announce");
            encode_into(&Value::string(first), &mut buf);

            let tiers = self
                .trackers
                .iter()
                .map(|t| Value::List(vec![Value::string(t)]))
                .collect();
            write_key(&mut buf, b"announce-list");
            encode_into(&Value::List(tiers), &mut buf);
        }

        write_key(&mut buf, b"created by");
        encode_into(&Value::string(&self.created_by), &mut buf);

        write_key(&mut buf, b"creation date");
        encode_into(&Value::Integer(self.creation_date), &mut buf);

        write_key(&mut buf, b"info");
        buf.extend_from_slice(&self.info);

        buf.push(b'e');
        Ok(buf)
    }
}

fn write_key(buf: &mut Vec<u8>, key: &[u8]) {
    encode_into(&Value::Bytes(Bytes::copy_from_slice(key)), buf);
}

/// Renders an output filename template.
///
/// `{name}` is replaced with the sanitised torrent name and `{hash}` with the
/// lowercase hex info hash. Control characters (0x00-0x1F, 0x7F) and path
/// separators in the name become `_`.
pub fn torrent_file_name(template: &str, name: &str, info_hash: &InfoHash) -> String {
    template
        .replace("{name}", &sanitize_name(name))
        .replace("{hash}", &info_hash.to_hex())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_control() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Checks that a filename template only uses the `{name}` and `{hash}`
/// placeholders, so the CLI can reject a bad template before fetching.
pub fn validate_template(template: &str) -> bool {
    let stripped = template.replace("{name}", "").replace("{hash}", "");
    !stripped.contains('{') && !stripped.contains('}')
}
