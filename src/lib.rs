//! torrify - turn magnet links into torrent files
//!
//! A magnet link names a torrent by info hash but carries none of its
//! metadata. This crate fetches that metadata from the swarm: it announces
//! to the magnet's trackers, connects to the peers they return, downloads
//! the info dictionary over the `ut_metadata` extension, validates it
//! against the info hash, and composes a `.torrent` file around it.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`metainfo`] - magnet links, info hashes, torrent file composition
//! - [`peer`] - BEP-3/6/10 peer wire protocol and the BEP-9 metadata fetch
//! - [`tracker`] - BEP-3/15/23/41 HTTP and UDP tracker announces
//! - [`fetch`] - the per-magnet coordinator tying the above together
//!
//! # Example
//!
//! ```no_run
//! use torrify::{FetchConfig, Fetcher, MagnetLink, TorrentFile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let magnet = MagnetLink::parse(
//!     "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&tr=http://t/announce",
//! )?;
//!
//! let fetcher = Fetcher::new(FetchConfig::default());
//! let fetched = fetcher.fetch(&magnet).await?;
//!
//! let torrent = TorrentFile::compose(fetched.info, fetched.trackers);
//! std::fs::write("out.torrent", torrent.to_bytes()?)?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod constants;
pub mod fetch;
pub mod metainfo;
pub mod peer;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use fetch::{FetchConfig, FetchError, FetchedInfo, Fetcher};
pub use metainfo::{InfoHash, MagnetLink, MetainfoError, TorrentFile};
pub use peer::{PeerError, PeerId, PeerSession};
pub use tracker::{AnnounceResponse, HttpTracker, Tracker, TrackerError, UdpTracker};

#[cfg(test)]
pub(crate) mod testutil;
