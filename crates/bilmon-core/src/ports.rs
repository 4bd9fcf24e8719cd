use async_trait::async_trait;

use crate::{
    domain::{BlockHeight, BlockRecord, Destination},
    Result,
};

/// Hexagonal port for the ledger source.
///
/// The gateway adapter normalizes transport failures to
/// `Error::SourceUnavailable`; the monitor treats those as "no information"
/// and retains its baseline.
#[async_trait]
pub trait SourcePort: Send + Sync {
    /// Latest observed block height.
    async fn latest_height(&self) -> Result<BlockHeight>;

    /// Full latest record (header + transactions), fetched on demand once a
    /// transition has been detected.
    async fn latest_block(&self) -> Result<BlockRecord>;
}

/// Hexagonal port for the persisted destination registry.
///
/// The external store is the source of truth; this process never caches the
/// destination set across cycles. `remove` is idempotent: removing an absent
/// destination is not an error.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    async fn list(&self) -> Result<Vec<Destination>>;
    async fn add(&self, destination: &Destination) -> Result<()>;
    async fn remove(&self, destination: &Destination) -> Result<()>;
}
