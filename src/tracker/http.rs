use std::fmt::Write as _;

use reqwest::Client;
use tracing::{trace, warn};

use super::error::TrackerError;
use super::response::{parse_compact_peers, parse_compact_peers6, AnnounceResponse, TrackerEvent};
use super::{AnnounceParams, TrackerConfig};
use crate::bencode::decode;
use crate::constants::USER_AGENT;
use crate::metainfo::percent_encode;

/// An HTTP(S) tracker client ([BEP-3]).
///
/// Announces are plain GET requests. The `info_hash` and `peer_id` query
/// values are raw bytes percent-encoded per byte, not UTF-8 strings, so the
/// query string is assembled by hand rather than through a URL builder.
///
/// [BEP-3]: http://bittorrent.org/beps/bep_0003.html
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        Self::with_config(url, &TrackerConfig::default())
    }

    pub fn with_config(url: &str, config: &TrackerConfig) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn announce(
        &self,
        params: &AnnounceParams,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        // Keep any query string the announce URL already carries; drop a
        // fragment if one sneaked in.
        let base = self.url.split('#').next().unwrap_or(&self.url);
        let separator = if base.contains('?') { '&' } else { '?' };

        let mut target = format!(
            "{base}{separator}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left=0&compact=1&numwant={}",
            params.info_hash.url_encode(),
            percent_encode(params.peer_id.as_bytes()),
            params.port,
            params.numwant,
        );
        let event_str = event.as_http_str();
        if !event_str.is_empty() {
            let _ = write!(target, "&event={event_str}");
        }

        trace!(url = %self.url, "announcing");
        let response = self.client.get(&target).send().await?;
        let response = response.error_for_status()?;
        let body = response.bytes().await?;
        trace!(url = %self.url, len = body.len(), "announce reply");

        parse_announce_body(&body, &self.url)
    }
}

/// Parses a bencoded HTTP announce body into peers.
///
/// A `failure reason` is a hard failure even under HTTP 200. Both the
/// compact byte-string and the original dict-list peer forms are accepted,
/// as are IPv6 peers via `peers6` or non-compact entries.
pub(super) fn parse_announce_body(body: &[u8], url: &str) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    if value.as_dict().is_none() {
        return Err(TrackerError::InvalidResponse("expected dict".into()));
    }

    if let Some(reason) = value.get(b"failure reason") {
        let reason = reason.as_str().unwrap_or("<undecodable>").to_string();
        return Err(TrackerError::Failure(reason));
    }

    let interval = value.int_field(b"interval").unwrap_or(0) as u32;
    let mut response = AnnounceResponse::new(interval);

    if let Some(warning) = value.str_field(b"warning message") {
        warn!(tracker = %url, warning, "tracker warning");
        response.warning_message = Some(warning.to_string());
    }

    response.complete = value.int_field(b"complete").map(|v| v as u32);
    response.incomplete = value.int_field(b"incomplete").map(|v| v as u32);

    if let Some(peers) = value.get(b"peers") {
        if let Some(bytes) = peers.as_bytes() {
            response.peers = parse_compact_peers(bytes);
        } else if let Some(list) = peers.as_list() {
            for peer in list {
                if peer.as_dict().is_none() {
                    return Err(TrackerError::InvalidResponse("bad peers entry".into()));
                }
                let ip = peer.str_field(b"ip").and_then(|s| s.parse().ok());
                let port = peer
                    .int_field(b"port")
                    .and_then(|p| u16::try_from(p).ok());
                if let (Some(ip), Some(port)) = (ip, port) {
                    response.peers.push(std::net::SocketAddr::new(ip, port));
                }
            }
        } else {
            return Err(TrackerError::InvalidResponse("bad peers value".into()));
        }
    }

    if let Some(peers6) = value.bytes_field(b"peers6") {
        response.peers.extend(parse_compact_peers6(peers6));
    }

    Ok(response)
}
