//! Fan-out dispatch: one formatted notification to every destination across
//! every delivery channel, with per-destination bounded retry and permanent
//! failure eviction.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    channel::{ConnectionState, DeliveryChannel, DeliveryOutcome},
    domain::{Destination, LinkButton},
    ports::RegistryPort,
    Result,
};

/// Per-destination retry policy: bounded attempts with linear backoff
/// (attempt index times the backoff unit between attempts).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Aggregate result of one fan-out cycle. Individual destination failures
/// never fail the dispatch; only a registry fetch failure does.
#[derive(Clone, Debug, Default)]
pub struct DispatchReport {
    pub channels: Vec<ChannelReport>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.channels.iter().map(|c| c.delivered).sum()
    }

    pub fn transient(&self) -> usize {
        self.channels.iter().map(|c| c.transient).sum()
    }

    pub fn evicted(&self) -> usize {
        self.channels.iter().map(|c| c.evicted).sum()
    }
}

#[derive(Clone, Debug)]
pub struct ChannelReport {
    pub channel: &'static str,
    pub delivered: usize,
    /// Destinations that exhausted their attempts this cycle (including a
    /// whole channel skipped while offline).
    pub transient: usize,
    /// Destinations that answered with a forbidden/blocked class response.
    pub evicted: usize,
    pub offline: bool,
}

impl ChannelReport {
    fn new(channel: &'static str) -> Self {
        Self {
            channel,
            delivered: 0,
            transient: 0,
            evicted: 0,
            offline: false,
        }
    }

    fn offline(channel: &'static str) -> Self {
        Self {
            offline: true,
            transient: 1,
            ..Self::new(channel)
        }
    }
}

pub struct FanoutDispatcher {
    registry: Arc<dyn RegistryPort>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    links: Vec<LinkButton>,
    retry: RetryPolicy,
    send_timeout: Duration,
}

impl FanoutDispatcher {
    pub fn new(
        registry: Arc<dyn RegistryPort>,
        channels: Vec<Arc<dyn DeliveryChannel>>,
        links: Vec<LinkButton>,
        retry: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            channels,
            links,
            retry,
            send_timeout,
        }
    }

    /// Fan one formatted message out to every channel.
    ///
    /// The registry snapshot is fetched fresh each cycle; a fetch failure
    /// aborts the whole dispatch (`RegistryUnavailable`) rather than
    /// notifying on stale data. Channels run concurrently; within a channel,
    /// destinations are attempted sequentially so retries keep their backoff
    /// spacing.
    pub async fn dispatch(&self, text: &str) -> Result<DispatchReport> {
        let registered = dedup_destinations(self.registry.list().await?);
        debug!(destinations = registered.len(), "registry snapshot fetched");

        let mut tasks = JoinSet::new();
        for channel in self.channels.iter().cloned() {
            let registry = self.registry.clone();
            let registered = registered.clone();
            let text = text.to_string();
            let links = self.links.clone();
            let retry = self.retry;
            let send_timeout = self.send_timeout;
            tasks.spawn(async move {
                dispatch_channel(channel, registry, &registered, &text, &links, retry, send_timeout)
                    .await
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(channel_report) => report.channels.push(channel_report),
                Err(e) => warn!(error = %e, "channel dispatch task failed"),
            }
        }

        info!(
            delivered = report.delivered(),
            transient = report.transient(),
            evicted = report.evicted(),
            "fan-out complete"
        );
        Ok(report)
    }
}

/// De-duplicate while preserving first-seen order, so delivery order follows
/// registration order even when the registry returns duplicates.
fn dedup_destinations(list: Vec<Destination>) -> Vec<Destination> {
    let mut seen = HashSet::new();
    list.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

async fn dispatch_channel(
    channel: Arc<dyn DeliveryChannel>,
    registry: Arc<dyn RegistryPort>,
    registered: &[Destination],
    text: &str,
    links: &[LinkButton],
    retry: RetryPolicy,
    send_timeout: Duration,
) -> ChannelReport {
    if channel.connection().state() != ConnectionState::Connected {
        warn!(channel = channel.name(), "channel offline, skipping fan-out");
        return ChannelReport::offline(channel.name());
    }

    let mut report = ChannelReport::new(channel.name());

    let destinations = match channel.resolve_destinations(registered).await {
        Ok(d) => d,
        Err(e) => {
            warn!(channel = channel.name(), error = %e, "destination resolution failed");
            report.transient += 1;
            return report;
        }
    };

    for destination in destinations {
        match deliver_with_retry(channel.as_ref(), &destination, text, links, retry, send_timeout)
            .await
        {
            DeliveryOutcome::Success => report.delivered += 1,
            DeliveryOutcome::TransientFailure(reason) => {
                warn!(
                    channel = channel.name(),
                    destination = %destination,
                    reason = %reason,
                    "delivery failed after retries"
                );
                report.transient += 1;
            }
            DeliveryOutcome::PermanentFailure(reason) => {
                warn!(
                    channel = channel.name(),
                    destination = %destination,
                    reason = %reason,
                    "destination rejected delivery, evicting"
                );
                report.evicted += 1;
                if channel.registry_backed() {
                    // Best-effort: the registry is the source of truth and is
                    // re-fetched next cycle anyway.
                    if let Err(e) = registry.remove(&destination).await {
                        warn!(
                            destination = %destination,
                            error = %e,
                            "registry eviction failed, will retry next cycle"
                        );
                    }
                }
            }
        }
    }

    report
}

async fn deliver_with_retry(
    channel: &dyn DeliveryChannel,
    destination: &Destination,
    text: &str,
    links: &[LinkButton],
    retry: RetryPolicy,
    send_timeout: Duration,
) -> DeliveryOutcome {
    let mut last_reason = String::new();

    for attempt in 1..=retry.max_attempts {
        let outcome = match timeout(send_timeout, channel.deliver(destination, text, links)).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::TransientFailure("send timed out".to_string()),
        };

        match outcome {
            DeliveryOutcome::Success => return DeliveryOutcome::Success,
            permanent @ DeliveryOutcome::PermanentFailure(_) => return permanent,
            DeliveryOutcome::TransientFailure(reason) => {
                debug!(
                    channel = channel.name(),
                    destination = %destination,
                    attempt,
                    reason = %reason,
                    "delivery attempt failed"
                );
                last_reason = reason;
                if attempt < retry.max_attempts {
                    sleep(retry.backoff_unit * attempt).await;
                }
            }
        }
    }

    DeliveryOutcome::TransientFailure(format!(
        "exhausted {} attempts: {last_reason}",
        retry.max_attempts
    ))
}
