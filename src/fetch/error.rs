use thiserror::Error;

/// Terminal failure of one magnet fetch.
///
/// Individual tracker and peer errors never surface here; they are counted
/// and logged along the way. A fetch fails only when there was nothing to
/// try, nothing worked, or time ran out.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The magnet link carries neither trackers nor peer hints.
    #[error("magnet link names no trackers or peer hints")]
    NoTrackers,

    /// Every tracker and every discovered peer failed.
    #[error(
        "no peers yielded metadata ({peers_tried} peers tried, {tracker_failures} tracker failures)"
    )]
    NoMetadata {
        peers_tried: usize,
        tracker_failures: usize,
    },

    /// The per-magnet deadline expired.
    #[error("fetch deadline expired")]
    DeadlineExpired,
}
