//! Delivery channel port and shared connection state.

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use crate::{
    domain::{Destination, LinkButton},
    Result,
};

/// Lifecycle state of a chat platform connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of a single delivery attempt.
///
/// Transient failures are retried within the cycle; a permanent failure
/// aborts the attempt series and (for registry-backed channels) evicts the
/// destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
}

/// Shared connection state for one delivery channel.
///
/// The supervisor writes lifecycle transitions; adapters report mid-session
/// losses observed on send failures; the dispatcher and scheduler read.
#[derive(Debug)]
pub struct ConnectionGauge {
    state: watch::Sender<ConnectionState>,
    lost: Notify,
}

impl ConnectionGauge {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            lost: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn set(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Report an asynchronous connection loss (network-class send failure).
    /// Only a `Connected -> Disconnected` edge wakes the supervisor, so
    /// repeated reports during one outage collapse into one reconnect.
    pub fn report_lost(&self) {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            self.lost.notify_one();
        }
    }

    /// Resolves once a connection loss has been reported while `Connected`.
    pub async fn lost(&self) {
        self.lost.notified().await;
    }
}

impl Default for ConnectionGauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-platform delivery port.
///
/// Telegram (group messaging) and Discord (guild broadcast) implement this in
/// their adapter crates. `deliver` performs exactly one attempt; the retry
/// loop lives in the dispatcher. Transport errors are classified into
/// `DeliveryOutcome` at this boundary so the core never inspects
/// platform-specific error shapes.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn connection(&self) -> &ConnectionGauge;

    /// Whether this channel's destinations come from the registry. Only
    /// registry-backed destinations are evicted on permanent failure.
    fn registry_backed(&self) -> bool;

    /// Establish (or re-establish) the platform session.
    async fn connect(&self) -> Result<()>;

    /// Resolve this channel's destination set for one fan-out cycle.
    /// `registered` is the de-duplicated registry snapshot; channels that
    /// derive destinations from their own connection state ignore it.
    async fn resolve_destinations(&self, registered: &[Destination]) -> Result<Vec<Destination>>;

    /// One delivery attempt to one destination.
    async fn deliver(
        &self,
        destination: &Destination,
        text: &str,
        links: &[LinkButton],
    ) -> DeliveryOutcome;
}
