use std::fmt;

/// Ledger block height (monotonic under normal operation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHeight(pub u64);

/// Opaque chat destination identifier.
///
/// Telegram destinations are stringified group chat ids; Discord destinations
/// are channel-id snowflakes. The dispatcher treats both uniformly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination(pub String);

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A block as returned by the ledger source. Immutable once fetched; owned
/// transiently by a single poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: BlockHeight,
    pub timestamp_nanos: i64,
}

/// A reward transaction. The amount is implicit: every block carries the
/// fixed block reward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub recipient: String,
    pub timestamp_nanos: i64,
}

/// An interactive link button attached to outgoing notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

impl LinkButton {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}
