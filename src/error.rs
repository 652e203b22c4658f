use std::io;

/// Errors surfaced at the library boundary.
///
/// Per-probe validation failures (wrong source address, bad ICMP type, stale
/// sequence) are not errors; the engines skip the offending packet and keep
/// running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name resolution failed or produced no usable candidate.
    #[error("cannot resolve {0}")]
    Resolve(String),

    /// Socket creation, configuration or I/O failed.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// The URL scheme is not one the engine speaks.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    /// The URL failed to parse.
    #[error("invalid url: {0}")]
    InvalidUrl(&'static str),

    /// The response header failed to parse.
    #[error("malformed http header")]
    MalformedHeader,

    /// The peer stopped sending before the response header was complete.
    #[error("timed out reading response header")]
    Timeout,

    /// The kernel accepted fewer bytes than the request head contains.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// The probe payload does not fit the transmit buffer.
    #[error("probe payload too large ({0} bytes)")]
    PayloadTooLarge(usize),

    /// The operation needs a concrete address family.
    #[error("address family not usable for this operation")]
    Family,
}

pub type Result<T> = std::result::Result<T, Error>;
