// Error types for the collector core and its transport

/// Failures of the underlying publish/subscribe transport.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Fatal outcomes of one scatter-gather run.
#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error("invalid name filter {pattern:?}: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("subscribing to the reply inbox failed: {0}")]
    Subscribe(#[source] TransportError),
    #[error("publishing the server ping failed: {0}")]
    Publish(#[source] TransportError),
    #[error(
        "no results received ({seen} replies seen), ensure the account used has system privileges and appropriate permissions"
    )]
    NoResults { seen: u32 },
}
