//! Per-magnet fetch coordination
//!
//! The coordinator owns the whole life of one magnet fetch: announce to
//! every tracker concurrently, pool the discovered peers, race bounded peer
//! sessions against each other, and hand back the first validated info
//! blob. Tracker and peer failures are recorded, never propagated; the only
//! caller-visible failures are "nothing to try" and "everything failed".

mod coordinator;
mod error;

pub use coordinator::{FetchConfig, FetchedInfo, Fetcher};
pub use error::FetchError;
