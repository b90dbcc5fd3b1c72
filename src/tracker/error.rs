use thiserror::Error;

/// Errors from a tracker announce.
///
/// None of these are fatal to an overall fetch; the coordinator tags them
/// with the tracker URL, records them, and proceeds with whatever remains.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Socket-level failure (DNS, bind, send, receive).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure or error status.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not valid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The tracker rejected the announce (`failure reason` / error action).
    #[error("tracker returned failure: {0}")]
    Failure(String),

    /// The response decoded but made no sense.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The retry schedule ran out without a usable reply.
    #[error("timeout")]
    Timeout,

    /// The announce URL could not be parsed.
    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),

    /// The announce URL has a scheme we do not speak.
    #[error("unsupported tracker url scheme: {0}")]
    UnsupportedScheme(String),
}
