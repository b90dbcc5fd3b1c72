use std::collections::HashMap;
use std::net::SocketAddr;

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed magnet link ([BEP-9]).
///
/// Magnet links identify a torrent by info hash plus hints: a display name,
/// tracker URLs, and sometimes direct peer addresses. Everything except the
/// info hash is optional.
///
/// # Format
///
/// ```text
/// magnet:?xt=urn:btih:<info-hash>&dn=<name>&tr=<tracker>&x.pe=<host:port>...
/// ```
///
/// # Examples
///
/// ```
/// use torrify::metainfo::MagnetLink;
///
/// let uri = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a\
///            &dn=Example&tr=http%3A%2F%2Ftracker.example.com%2Fannounce";
///
/// let magnet = MagnetLink::parse(uri).unwrap();
/// assert_eq!(magnet.display_name.as_deref(), Some("Example"));
/// assert_eq!(magnet.trackers.len(), 1);
/// ```
///
/// [BEP-9]: http://bittorrent.org/beps/bep_0009.html
#[derive(Debug, Clone)]
pub struct MagnetLink {
    /// The torrent's info hash (required).
    pub info_hash: InfoHash,
    /// Suggested display name from the `dn` parameter.
    pub display_name: Option<String>,
    /// Tracker URLs from the `tr` parameter, in link order.
    pub trackers: Vec<String>,
    /// Direct peer addresses from the `x.pe` parameter. Best-effort hints;
    /// entries that are not literal `ip:port` pairs are dropped.
    pub peer_hints: Vec<SocketAddr>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// Recognised parameters:
    ///
    /// - `xt` - exact topic, required. `urn:btih:` followed by a 40-character
    ///   hex or 32-character base32 info hash.
    /// - `dn` - display name (percent-decoded)
    /// - `tr` - tracker URL (percent-decoded, repeatable)
    /// - `x.pe` - peer address `host:port` (repeatable)
    ///
    /// Unknown parameters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MetainfoError::InvalidMagnet`] if the URI doesn't start with
    /// `magnet:?`, the `xt` parameter is missing, or the info hash form is
    /// not recognised.
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing magnet:? prefix".into()))?;

        let params = parse_query_string(query);

        let xt = params
            .get("xt")
            .and_then(|v| v.first())
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing xt parameter".into()))?;

        let hash = xt
            .strip_prefix("urn:btih:")
            .ok_or_else(|| MetainfoError::InvalidMagnet(format!("unsupported xt: {xt}")))?;

        let info_hash = InfoHash::parse(hash)
            .map_err(|_| MetainfoError::InvalidMagnet(format!("invalid info hash: {hash}")))?;

        let display_name = params
            .get("dn")
            .and_then(|v| v.first())
            .map(|s| url_decode(s));

        let trackers = params
            .get("tr")
            .map(|v| v.iter().map(|s| url_decode(s)).collect())
            .unwrap_or_default();

        let peer_hints = params
            .get("x.pe")
            .map(|v| {
                v.iter()
                    .filter_map(|s| url_decode(s).parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            info_hash,
            display_name,
            trackers,
            peer_hints,
        })
    }

    /// Converts this magnet link back to a URI string.
    pub fn to_uri(&self) -> String {
        use std::fmt::Write;

        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash.to_hex());

        if let Some(ref name) = self.display_name {
            let _ = write!(uri, "&dn={}", url_encode(name));
        }

        for tracker in &self.trackers {
            let _ = write!(uri, "&tr={}", url_encode(tracker));
        }

        for peer in &self.peer_hints {
            let _ = write!(uri, "&x.pe={}", peer);
        }

        uri
    }
}

fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    params
}

// Percent-decoding yields raw bytes; a multi-byte UTF-8 character arrives
// as several %XX escapes, so the bytes are collected first and decoded as
// UTF-8 in one go at the end.
fn url_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    bytes.push(byte);
                    continue;
                }
            }
            bytes.push(b'%');
            bytes.extend_from_slice(hex.as_bytes());
        } else if c == '+' {
            bytes.push(b' ');
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

fn url_encode(s: &str) -> String {
    super::info_hash::percent_encode(s.as_bytes())
}
