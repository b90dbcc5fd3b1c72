//! Tracker protocols (BEP-3, BEP-15, BEP-23, BEP-41)
//!
//! Trackers are peer-discovery services. This module implements single-shot
//! announces over HTTP(S) and UDP behind one scheme-dispatching [`Tracker`]
//! type; a failed announce is always a typed error, never a panic, so the
//! fetch coordinator can shrug it off and move on.

mod error;
mod http;
mod response;
mod udp;

use std::time::Duration;

pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{parse_compact_peers, parse_compact_peers6, AnnounceResponse, TrackerEvent};
pub use udp::{UdpTracker, UdpTrackerConfig};

use crate::constants::{NUMWANT, TRACKER_TIMEOUT};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// Parameters common to every announce we send.
#[derive(Debug, Clone, Copy)]
pub struct AnnounceParams {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// Port reported to the tracker. We never listen on it.
    pub port: u16,
    /// Random per-process key (BEP-15); lets a tracker recognise us across
    /// address changes.
    pub key: u32,
    pub numwant: u32,
}

/// Tunables shared by both tracker transports.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// HTTP request timeout. The coordinator additionally bounds every
    /// announce, UDP included, with this deadline.
    pub timeout: Duration,
    pub udp: UdpTrackerConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: TRACKER_TIMEOUT,
            udp: UdpTrackerConfig::default(),
        }
    }
}

impl AnnounceParams {
    pub fn new(info_hash: InfoHash, peer_id: PeerId, port: u16, key: u32) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            key,
            numwant: NUMWANT,
        }
    }
}

/// A tracker client, dispatched on the announce URL scheme.
pub enum Tracker {
    Http(HttpTracker),
    Udp(UdpTracker),
}

impl Tracker {
    /// Builds a client for an announce URL with default configuration.
    pub fn from_url(url: &str) -> Result<Self, TrackerError> {
        Self::from_url_with(url, &TrackerConfig::default())
    }

    pub fn from_url_with(url: &str, config: &TrackerConfig) -> Result<Self, TrackerError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(Tracker::Http(HttpTracker::with_config(url, config)?))
        } else if url.starts_with("udp://") {
            Ok(Tracker::Udp(UdpTracker::with_config(url, config.udp.clone())?))
        } else {
            let scheme = url.split(':').next().unwrap_or(url);
            Err(TrackerError::UnsupportedScheme(scheme.to_string()))
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Tracker::Http(t) => t.url(),
            Tracker::Udp(t) => t.url(),
        }
    }

    /// Announces and returns the discovered peers.
    pub async fn announce(
        &self,
        params: &AnnounceParams,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        match self {
            Tracker::Http(t) => t.announce(params, event).await,
            Tracker::Udp(t) => t.announce(params, event).await,
        }
    }
}
