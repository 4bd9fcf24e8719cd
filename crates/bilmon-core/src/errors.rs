/// Core error type for the block monitor.
///
/// Adapter crates map their transport-specific errors into this type at the
/// boundary so the monitor core can handle failures consistently (skip cycle
/// vs. retry vs. evict).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("ledger source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("group registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("malformed block record: {0}")]
    MalformedRecord(String),

    #[error("channel {0} is offline")]
    ChannelOffline(&'static str),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
