use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashSet;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::FetchError;
use crate::constants::{
    ANNOUNCE_CONCURRENCY, DEFAULT_PORT, MAGNET_DEADLINE, PEERS_PER_MAGNET, TRACKER_STOP_TIMEOUT,
};
use crate::metainfo::{InfoHash, MagnetLink};
use crate::peer::{PeerError, PeerId, PeerSession, SessionConfig};
use crate::tracker::{AnnounceParams, Tracker, TrackerConfig, TrackerEvent};

/// Tunables for the per-magnet coordinator.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Port reported to trackers; never listened on.
    pub port: u16,
    /// Maximum simultaneous announces.
    pub announce_concurrency: usize,
    /// Maximum simultaneous peer sessions.
    pub peer_limit: usize,
    /// Overall per-magnet deadline.
    pub deadline: Duration,
    pub tracker: TrackerConfig,
    pub session: SessionConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            announce_concurrency: ANNOUNCE_CONCURRENCY,
            peer_limit: PEERS_PER_MAGNET,
            deadline: MAGNET_DEADLINE,
            tracker: TrackerConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// The terminal artifact of a successful fetch: validated raw info bytes
/// plus the side-channel data the caller needs to compose a torrent file.
#[derive(Debug, Clone)]
pub struct FetchedInfo {
    /// Raw info dictionary bytes; SHA-1 equals the magnet's info hash.
    pub info: Bytes,
    pub info_hash: InfoHash,
    /// Tracker URLs from the magnet, in order.
    pub trackers: Vec<String>,
}

/// Process-wide fetch identity and entry point.
///
/// One `Fetcher` carries the peer ID and announce key shared by every
/// magnet it fetches, and remembers peers that served data failing the hash
/// check so later fetches skip them.
pub struct Fetcher {
    peer_id: PeerId,
    key: u32,
    config: FetchConfig,
    hostile: DashSet<SocketAddr>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self::with_rng(&mut rand::rng(), config)
    }

    /// Builds the fetcher from a caller-supplied RNG so tests get
    /// deterministic identity.
    pub fn with_rng<R: Rng>(rng: &mut R, config: FetchConfig) -> Self {
        let peer_id = PeerId::generate_with(rng);
        let key: u32 = rng.random();
        debug!(%peer_id, key = format_args!("{key:08x}"), port = config.port, "fetcher identity");
        Self {
            peer_id,
            key,
            config,
            hostile: DashSet::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Fetches the info dictionary for one magnet link.
    ///
    /// Resolution: announce to every tracker concurrently, feed discovered
    /// peers (deduplicated by address) into a bounded session pool, and
    /// return the first blob whose SHA-1 matches the magnet's info hash.
    /// All remaining work is cancelled as soon as a winner emerges or the
    /// deadline passes.
    pub async fn fetch(&self, magnet: &MagnetLink) -> Result<FetchedInfo, FetchError> {
        match timeout(self.config.deadline, self.run(magnet)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(info_hash = %magnet.info_hash, "fetch deadline expired");
                Err(FetchError::DeadlineExpired)
            }
        }
    }

    async fn run(&self, magnet: &MagnetLink) -> Result<FetchedInfo, FetchError> {
        if magnet.trackers.is_empty() && magnet.peer_hints.is_empty() {
            return Err(FetchError::NoTrackers);
        }

        let info_hash = magnet.info_hash;
        info!(
            %info_hash,
            name = magnet.display_name.as_deref().unwrap_or("<unnamed>"),
            trackers = magnet.trackers.len(),
            "fetching info"
        );

        let params = AnnounceParams::new(info_hash, self.peer_id, self.config.port, self.key);

        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<SocketAddr>();
        let announce_sem = Arc::new(Semaphore::new(self.config.announce_concurrency));
        let mut announces: JoinSet<bool> = JoinSet::new();
        let mut tracker_failures = 0usize;

        for url in &magnet.trackers {
            let tracker = match Tracker::from_url_with(url, &self.config.tracker) {
                Ok(tracker) => tracker,
                Err(e) => {
                    warn!(tracker = %url, error = %e, "skipping tracker");
                    tracker_failures += 1;
                    continue;
                }
            };
            let tx = peer_tx.clone();
            let sem = announce_sem.clone();
            let deadline = self.config.tracker.timeout;
            announces.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                announce_and_send(tracker, params, deadline, tx).await
            });
        }

        // Peer hints from the magnet go through the same dedup as
        // tracker-derived peers; nothing guarantees they are reachable.
        for hint in &magnet.peer_hints {
            let _ = peer_tx.send(*hint);
        }
        drop(peer_tx);

        let session_sem = Arc::new(Semaphore::new(self.config.peer_limit));
        let mut sessions: JoinSet<(SocketAddr, Result<Bytes, PeerError>)> = JoinSet::new();
        let seen: Mutex<HashSet<SocketAddr>> = Mutex::new(HashSet::new());
        let mut peers_done = false;
        let mut peers_tried = 0usize;

        loop {
            tokio::select! {
                Some(joined) = announces.join_next(), if !announces.is_empty() => {
                    if !matches!(joined, Ok(true)) {
                        tracker_failures += 1;
                    }
                }
                maybe_addr = peer_rx.recv(), if !peers_done => {
                    match maybe_addr {
                        Some(addr) => {
                            if self.hostile.contains(&addr) {
                                debug!(peer = %addr, "known hostile peer; skipping");
                            } else if seen.lock().insert(addr) {
                                peers_tried += 1;
                                let sem = session_sem.clone();
                                let session_config = self.config.session.clone();
                                let peer_id = self.peer_id;
                                sessions.spawn(async move {
                                    let _permit =
                                        sem.acquire_owned().await.expect("semaphore closed");
                                    let session = PeerSession::with_config(
                                        addr,
                                        info_hash,
                                        peer_id,
                                        session_config,
                                    );
                                    (addr, session.run().await)
                                });
                            } else {
                                debug!(peer = %addr, "duplicate peer; skipping");
                            }
                        }
                        None => peers_done = true,
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    match joined {
                        Ok((addr, Ok(blob))) => {
                            info!(peer = %addr, bytes = blob.len(), "metadata received");
                            // Winner takes all; everything else gets cancelled
                            // and awaited before we return.
                            sessions.shutdown().await;
                            announces.shutdown().await;
                            return Ok(FetchedInfo {
                                info: blob,
                                info_hash,
                                trackers: magnet.trackers.clone(),
                            });
                        }
                        Ok((addr, Err(e))) => {
                            if e.is_hostile() {
                                warn!(peer = %addr, error = %e, "hostile peer recorded");
                                self.hostile.insert(addr);
                            } else {
                                debug!(peer = %addr, error = %e, "peer session failed");
                            }
                        }
                        Err(_) => {}
                    }
                }
                else => break,
            }
        }

        warn!(%info_hash, peers_tried, tracker_failures, "no peers yielded metadata");
        Err(FetchError::NoMetadata {
            peers_tried,
            tracker_failures,
        })
    }
}

/// Runs one announce under its deadline and streams the peers it found into
/// the pool. Returns whether the announce succeeded.
async fn announce_and_send(
    tracker: Tracker,
    params: AnnounceParams,
    deadline: Duration,
    tx: mpsc::UnboundedSender<SocketAddr>,
) -> bool {
    let url = tracker.url().to_string();
    match timeout(deadline, tracker.announce(&params, TrackerEvent::Started)).await {
        Ok(Ok(response)) => {
            info!(tracker = %url, peers = response.peers.len(), "announce succeeded");
            for addr in &response.peers {
                let _ = tx.send(*addr);
            }
            // Best-effort goodbye so the tracker can drop us from the swarm.
            let _ = timeout(
                TRACKER_STOP_TIMEOUT,
                tracker.announce(&params, TrackerEvent::Stopped),
            )
            .await;
            true
        }
        Ok(Err(e)) => {
            warn!(tracker = %url, error = %e, "announce failed");
            false
        }
        Err(_) => {
            warn!(tracker = %url, "announce timed out");
            false
        }
    }
}
