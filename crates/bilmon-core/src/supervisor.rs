//! Per-channel connection supervision.
//!
//! Each delivery channel gets one supervisor task driving
//! `Disconnected -> Connecting -> Connected -> Disconnected`: failed logins
//! retry after a fixed delay, forever, and a mid-session loss reported by the
//! adapter re-enters the same loop. A long-running relay must self-heal, so
//! there is no retry cap.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::{ConnectionState, DeliveryChannel};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct ChannelSupervisor {
    channel: Arc<dyn DeliveryChannel>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl ChannelSupervisor {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            reconnect_delay,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            self.channel.connection().set(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.channel.connect() => match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(channel = self.channel.name(), error = %e, "connect failed");
                        false
                    }
                }
            };

            if connected {
                self.channel.connection().set(ConnectionState::Connected);
                info!(channel = self.channel.name(), "channel connected");

                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.channel.connection().lost() => {
                        warn!(
                            channel = self.channel.name(),
                            "connection lost, scheduling reconnect"
                        );
                    }
                }
            }

            self.channel.connection().set(ConnectionState::Disconnected);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }

        self.channel.connection().set(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConnectionGauge, DeliveryOutcome};
    use crate::domain::{Destination, LinkButton};
    use crate::errors::Error;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyChannel {
        connection: ConnectionGauge,
        connect_calls: AtomicUsize,
        failures_before_success: usize,
    }

    impl FlakyChannel {
        fn failing_first(failures_before_success: usize) -> Arc<Self> {
            Arc::new(Self {
                connection: ConnectionGauge::new(),
                connect_calls: AtomicUsize::new(0),
                failures_before_success,
            })
        }

        fn calls(&self) -> usize {
            self.connect_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliveryChannel for FlakyChannel {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn connection(&self) -> &ConnectionGauge {
            &self.connection
        }

        fn registry_backed(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<()> {
            let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_success {
                return Err(Error::ConnectionLost("login rejected".to_string()));
            }
            Ok(())
        }

        async fn resolve_destinations(
            &self,
            _registered: &[Destination],
        ) -> Result<Vec<Destination>> {
            Ok(Vec::new())
        }

        async fn deliver(
            &self,
            _destination: &Destination,
            _text: &str,
            _links: &[LinkButton],
        ) -> DeliveryOutcome {
            DeliveryOutcome::Success
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_retry_on_the_fixed_delay() {
        let channel = FlakyChannel::failing_first(2);
        let cancel = CancellationToken::new();
        let handle = ChannelSupervisor::new(
            channel.clone(),
            DEFAULT_RECONNECT_DELAY,
            cancel.clone(),
        )
        .spawn();

        // Two failures at t=0 and t=5, success at t=10.
        sleep(Duration::from_secs(12)).await;
        assert_eq!(channel.calls(), 3);
        assert_eq!(channel.connection.state(), ConnectionState::Connected);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(channel.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_schedules_exactly_one_reconnect() {
        let channel = FlakyChannel::failing_first(0);
        let cancel = CancellationToken::new();
        let handle =
            ChannelSupervisor::new(channel.clone(), DEFAULT_RECONNECT_DELAY, cancel.clone())
                .spawn();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(channel.connection.state(), ConnectionState::Connected);
        assert_eq!(channel.calls(), 1);

        channel.connection.report_lost();
        sleep(Duration::from_secs(6)).await;
        assert_eq!(channel.calls(), 2);
        assert_eq!(channel.connection.state(), ConnectionState::Connected);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_keep_retrying_without_panicking() {
        let channel = FlakyChannel::failing_first(usize::MAX);
        let cancel = CancellationToken::new();
        let handle =
            ChannelSupervisor::new(channel.clone(), DEFAULT_RECONNECT_DELAY, cancel.clone())
                .spawn();

        sleep(Duration::from_secs(60)).await;
        assert!(channel.calls() >= 10);
        assert_eq!(channel.connection.state(), ConnectionState::Disconnected);

        cancel.cancel();
        handle.await.unwrap();
    }
}
