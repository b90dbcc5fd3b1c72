//! Protocol constants and tuning parameters.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &str = "-TF0001-";

/// User agent string for HTTP tracker requests
pub const USER_AGENT: &str = "torrify/0.1.0";

/// "Created by" string written into composed torrent files and sent in
/// extended handshakes
pub const CLIENT: &str = "torrify 0.1.0";

// ============================================================================
// Announce parameters
// ============================================================================

/// Port advertised to trackers. We never listen, so any non-zero value works.
pub const DEFAULT_PORT: u16 = 6881;

/// Number of peers to request per announce
pub const NUMWANT: u32 = 50;

/// Per-announce deadline for either tracker protocol
pub const TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the best-effort "stopped" announcement after a fetch
pub const TRACKER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Base timeout of the UDP retry schedule (BEP-15: 15 * 2^n)
pub const UDP_RETRY_BASE: Duration = Duration::from_secs(15);

/// Number of UDP send attempts before giving up
pub const UDP_MAX_ATTEMPTS: u32 = 4;

/// Lifetime of a UDP tracker connection ID (fixed by BEP-15)
pub const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// Peer sessions
// ============================================================================

/// Extended message ID we advertise for ut_metadata (BEP-9/BEP-10)
pub const UT_METADATA_ID: u8 = 3;

/// Metadata piece size (BEP-9)
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Sanity cap on the metadata size a peer may advertise (100 MiB)
pub const MAX_METADATA_SIZE: i64 = 100 * 1024 * 1024;

/// Maximum frame length accepted from a peer (2 MiB)
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Outstanding metadata piece requests per session
pub const METADATA_PIPELINE: usize = 5;

/// Overall deadline for one peer session
pub const SESSION_DEADLINE: Duration = Duration::from_secs(60);

/// Idle timeout for a single read from a peer
pub const PEER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single write to a peer
pub const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Fetch coordination
// ============================================================================

/// Maximum simultaneous announces per magnet
pub const ANNOUNCE_CONCURRENCY: usize = 20;

/// Maximum simultaneous peer sessions per magnet
pub const PEERS_PER_MAGNET: usize = 30;

/// Overall deadline for fetching one magnet's metadata
pub const MAGNET_DEADLINE: Duration = Duration::from_secs(300);

/// Maximum magnets processed at once in batch mode
pub const MAGNET_LIMIT: usize = 50;
