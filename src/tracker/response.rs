use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Announce events (BEP-3 names, BEP-15 codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    /// The `event` query value for HTTP announces; empty means omitted.
    pub fn as_http_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// The event code in UDP announce packets.
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// The useful parts of an announce reply.
///
/// `interval` is informational for a single-shot metadata fetch; the peers
/// are what the coordinator feeds to its session pool.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u32,
    /// IPv4 and IPv6 peers, flattened together.
    pub peers: Vec<SocketAddr>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub warning_message: Option<String>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            peers: Vec::new(),
            complete: None,
            incomplete: None,
            warning_message: None,
        }
    }
}

/// Parses compact IPv4 peers: 4 address bytes + 2 port bytes per entry
/// (BEP-23). Trailing partial entries are dropped.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}

/// Parses compact IPv6 peers: 16 address bytes + 2 port bytes per entry
/// (BEP-7).
pub fn parse_compact_peers6(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(18)
        .map(|chunk| {
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(&chunk[..16]);
            let port = u16::from_be_bytes([chunk[16], chunk[17]]);
            SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip_bytes)), port)
        })
        .collect()
}
