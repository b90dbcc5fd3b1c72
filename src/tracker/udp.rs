use std::net::SocketAddr;
use std::sync::LazyLock;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng as _;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use super::error::TrackerError;
use super::response::{parse_compact_peers, parse_compact_peers6, AnnounceResponse, TrackerEvent};
use super::AnnounceParams;
use crate::constants::{CONNECTION_ID_TTL, UDP_MAX_ATTEMPTS, UDP_RETRY_BASE};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// BEP-41 option type carrying the announce URL's path and query.
const OPTION_URLDATA: u8 = 0x02;

/// Connection IDs issued by trackers, cached per destination until their
/// 60-second lifetime runs out (BEP-15).
static CONNECTIONS: LazyLock<DashMap<(String, u16), CachedConnection>> =
    LazyLock::new(DashMap::new);

#[derive(Debug, Clone, Copy)]
struct CachedConnection {
    id: u64,
    expires: Instant,
}

/// Retry tuning for the UDP client. The protocol prescribes a timeout of
/// `15 * 2^n` seconds for the n-th attempt; tests shrink the base so the
/// whole schedule runs in milliseconds.
#[derive(Debug, Clone)]
pub struct UdpTrackerConfig {
    pub retry_base: Duration,
    pub max_attempts: u32,
}

impl Default for UdpTrackerConfig {
    fn default() -> Self {
        Self {
            retry_base: UDP_RETRY_BASE,
            max_attempts: UDP_MAX_ATTEMPTS,
        }
    }
}

/// A UDP tracker client ([BEP-15]).
///
/// Announcing is a two-step exchange: obtain a connection ID, then announce
/// under it. Datagrams whose transaction ID does not match the pending
/// request are dropped without aborting the attempt. The path and query of
/// the announce URL ride along as BEP-41 URL-data options.
///
/// [BEP-15]: http://bittorrent.org/beps/bep_0015.html
pub struct UdpTracker {
    url: String,
    host: String,
    port: u16,
    /// Path + query of the announce URL, sent as BEP-41 options.
    path_qs: String,
    config: UdpTrackerConfig,
}

enum Outcome<T> {
    Parsed(T),
    /// Tracker replied with an error action.
    Failure(String),
    /// Not our datagram (wrong transaction ID, wrong action, truncated).
    Ignored,
}

enum ExchangeError {
    /// The cached connection ID passed its 60-second lifetime mid-announce.
    ConnectionExpired,
    Tracker(TrackerError),
}

impl From<TrackerError> for ExchangeError {
    fn from(e: TrackerError) -> Self {
        ExchangeError::Tracker(e)
    }
}

impl UdpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        Self::with_config(url, UdpTrackerConfig::default())
    }

    pub fn with_config(url: &str, config: UdpTrackerConfig) -> Result<Self, TrackerError> {
        let rest = url
            .strip_prefix("udp://")
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

        let (authority, path_qs) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
            path_qs: path_qs.to_string(),
            config,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Announces to the tracker, trying each resolved address in order.
    pub async fn announce(
        &self,
        params: &AnnounceParams,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(TrackerError::Io)?
            .collect();

        let mut last_err = TrackerError::InvalidUrl(self.url.clone());
        for addr in addrs {
            match self.announce_to(addr, params, event).await {
                Ok(response) => return Ok(response),
                // The tracker spoke; its verdict stands, do not shop around.
                Err(e @ TrackerError::Failure(_)) => return Err(e),
                Err(e) => {
                    debug!(tracker = %self.url, %addr, error = %e, "address failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn announce_to(
        &self,
        addr: SocketAddr,
        params: &AnnounceParams,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        let bind_addr: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(addr).await?;

        loop {
            let connection = self.connection(&socket).await?;
            let transaction_id: u32 = rand::rng().random();
            let request = build_announce_request(
                connection.id,
                transaction_id,
                params,
                event,
                &self.path_qs,
            );

            let result = self
                .send_receive(&socket, &request, Some(connection.expires), |resp| {
                    parse_announce_response(transaction_id, resp, addr.is_ipv6())
                })
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(ExchangeError::ConnectionExpired) => {
                    trace!(tracker = %self.url, "connection id expired; reconnecting");
                    CONNECTIONS.remove(&(self.host.clone(), self.port));
                }
                Err(ExchangeError::Tracker(e)) => return Err(e),
            }
        }
    }

    /// Returns a live connection ID for this destination, reusing the cache
    /// when the previous one has lifetime left.
    async fn connection(&self, socket: &UdpSocket) -> Result<CachedConnection, TrackerError> {
        let key = (self.host.clone(), self.port);

        if let Some(cached) = CONNECTIONS.get(&key) {
            if Instant::now() < cached.expires {
                return Ok(*cached);
            }
        }

        trace!(tracker = %self.url, "requesting connection id");
        let transaction_id: u32 = rand::rng().random();
        let request = build_connect_request(transaction_id);

        let id = self
            .send_receive(socket, &request, None, |resp| {
                parse_connect_response(transaction_id, resp)
            })
            .await
            .map_err(|e| match e {
                ExchangeError::Tracker(e) => e,
                ExchangeError::ConnectionExpired => unreachable!("connect has no expiry"),
            })?;

        let connection = CachedConnection {
            id,
            expires: Instant::now() + CONNECTION_ID_TTL,
        };
        CONNECTIONS.insert(key, connection);
        Ok(connection)
    }

    /// Sends a request and waits for a parseable reply under the BEP-15
    /// retry schedule. Datagrams the parser ignores (transaction mismatch,
    /// truncation) keep the attempt's receive window open.
    async fn send_receive<T>(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        expires: Option<Instant>,
        parse: impl Fn(&[u8]) -> Outcome<T>,
    ) -> Result<T, ExchangeError> {
        let mut buf = vec![0u8; 4096];

        for attempt in 0..self.config.max_attempts {
            if let Some(expires) = expires {
                if Instant::now() >= expires {
                    return Err(ExchangeError::ConnectionExpired);
                }
            }

            socket.send(request).await.map_err(TrackerError::Io)?;

            let window = self.config.retry_base * (1u32 << attempt);
            let mut deadline = Instant::now() + window;
            if let Some(expires) = expires {
                deadline = deadline.min(expires);
            }

            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }

                match timeout(deadline - now, socket.recv(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => return Err(TrackerError::Io(e).into()),
                    Ok(Ok(n)) => match parse(&buf[..n]) {
                        Outcome::Parsed(value) => return Ok(value),
                        Outcome::Failure(msg) => {
                            return Err(TrackerError::Failure(msg).into());
                        }
                        Outcome::Ignored => {
                            trace!(tracker = %self.url, "dropping unexpected datagram");
                        }
                    },
                }
            }

            trace!(tracker = %self.url, attempt, "receive window elapsed; resending");
        }

        Err(TrackerError::Timeout.into())
    }
}

fn split_host_port(authority: &str) -> Option<(&str, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal: [addr]:port
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?.parse().ok()?;
        Some((host, port))
    } else {
        let (host, port) = authority.rsplit_once(':')?;
        Some((host, port.parse().ok()?))
    }
}

fn build_connect_request(transaction_id: u32) -> Vec<u8> {
    let mut request = Vec::with_capacity(16);
    request.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    request.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request
}

fn parse_connect_response(transaction_id: u32, resp: &[u8]) -> Outcome<u64> {
    if resp.len() < 16 {
        return check_error(transaction_id, resp);
    }
    let action = u32::from_be_bytes(resp[0..4].try_into().unwrap());
    let echoed = u32::from_be_bytes(resp[4..8].try_into().unwrap());

    if echoed != transaction_id {
        return Outcome::Ignored;
    }
    if action == ACTION_ERROR {
        return Outcome::Failure(String::from_utf8_lossy(&resp[8..]).into_owned());
    }
    if action != ACTION_CONNECT {
        return Outcome::Ignored;
    }

    Outcome::Parsed(u64::from_be_bytes(resp[8..16].try_into().unwrap()))
}

/// Packs the fixed 98-byte announce request, then appends the announce
/// URL's path and query as BEP-41 URL-data options in <= 255-byte segments.
fn build_announce_request(
    connection_id: u64,
    transaction_id: u32,
    params: &AnnounceParams,
    event: TrackerEvent,
    path_qs: &str,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(98 + path_qs.len() + 4);
    request.extend_from_slice(&connection_id.to_be_bytes());
    request.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request.extend_from_slice(params.info_hash.as_bytes());
    request.extend_from_slice(params.peer_id.as_bytes());
    request.extend_from_slice(&0u64.to_be_bytes()); // downloaded
    request.extend_from_slice(&0u64.to_be_bytes()); // left
    request.extend_from_slice(&0u64.to_be_bytes()); // uploaded
    request.extend_from_slice(&event.as_udp_id().to_be_bytes());
    request.extend_from_slice(&0u32.to_be_bytes()); // IP address (0 = sender's)
    request.extend_from_slice(&params.key.to_be_bytes());
    request.extend_from_slice(&params.numwant.to_be_bytes());
    request.extend_from_slice(&params.port.to_be_bytes());

    for segment in path_qs.as_bytes().chunks(255) {
        request.push(OPTION_URLDATA);
        request.push(segment.len() as u8);
        request.extend_from_slice(segment);
    }

    request
}

fn parse_announce_response(
    transaction_id: u32,
    resp: &[u8],
    is_ipv6: bool,
) -> Outcome<AnnounceResponse> {
    if resp.len() < 20 {
        return check_error(transaction_id, resp);
    }
    let action = u32::from_be_bytes(resp[0..4].try_into().unwrap());
    let echoed = u32::from_be_bytes(resp[4..8].try_into().unwrap());

    if echoed != transaction_id {
        return Outcome::Ignored;
    }
    if action == ACTION_ERROR {
        return Outcome::Failure(String::from_utf8_lossy(&resp[8..]).into_owned());
    }
    if action != ACTION_ANNOUNCE {
        return Outcome::Ignored;
    }

    let interval = u32::from_be_bytes(resp[8..12].try_into().unwrap());
    let leechers = u32::from_be_bytes(resp[12..16].try_into().unwrap());
    let seeders = u32::from_be_bytes(resp[16..20].try_into().unwrap());

    let mut response = AnnounceResponse::new(interval);
    response.incomplete = Some(leechers);
    response.complete = Some(seeders);
    response.peers = if is_ipv6 {
        parse_compact_peers6(&resp[20..])
    } else {
        parse_compact_peers(&resp[20..])
    };

    Outcome::Parsed(response)
}

/// Error replies are valid at any length >= 8; anything else short is noise.
fn check_error<T>(transaction_id: u32, resp: &[u8]) -> Outcome<T> {
    if resp.len() >= 8 {
        let action = u32::from_be_bytes(resp[0..4].try_into().unwrap());
        let echoed = u32::from_be_bytes(resp[4..8].try_into().unwrap());
        if action == ACTION_ERROR && echoed == transaction_id {
            return Outcome::Failure(String::from_utf8_lossy(&resp[8..]).into_owned());
        }
    }
    Outcome::Ignored
}
