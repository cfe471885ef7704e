use thiserror::Error;

/// Error kinds surfaced across the ingestion, tracking, and query paths.
///
/// Mirrors the propagation policy of the design's error-handling section:
/// upstream and wind failures are mostly recoverable and degrade the
/// affected read, while store and argument failures are reported directly
/// to the caller.
#[derive(Error, Debug)]
pub enum BalloonError {
    #[error("upstream balloon feed unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream balloon feed returned corrupt data: {0}")]
    UpstreamCorrupt(String),

    #[error("wind provider rate limited the request")]
    WindRateLimited,

    #[error("wind provider unavailable: {0}")]
    WindUnavailable(String),

    #[error("store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("store read failed: {0}")]
    StoreReadFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, BalloonError>;

impl From<reqwest::Error> for BalloonError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BalloonError::Timeout(err.to_string())
        } else {
            BalloonError::UpstreamUnavailable(err.to_string())
        }
    }
}
