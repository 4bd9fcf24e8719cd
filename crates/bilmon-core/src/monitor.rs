//! Poll-and-notify scheduling.
//!
//! Two periodic tasks: the poll cycle (fetch height, detect transition,
//! format, fan out) and a coarse heartbeat. Both start only once the primary
//! messaging connection reports `Connected` and skip ticks while it is
//! offline. A cycle runs to completion before the next tick is eligible
//! (missed ticks are skipped), so cycles never overlap a half-updated
//! baseline.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    channel::ConnectionState,
    detector::{ChangeDetector, Transition},
    dispatch::FanoutDispatcher,
    format,
    ports::SourcePort,
};

#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(600),
        }
    }
}

pub struct BlockMonitor {
    source: Arc<dyn SourcePort>,
    dispatcher: Arc<FanoutDispatcher>,
    primary: watch::Receiver<ConnectionState>,
    settings: MonitorSettings,
    cancel: CancellationToken,
    detector: ChangeDetector,
}

impl BlockMonitor {
    pub fn new(
        source: Arc<dyn SourcePort>,
        dispatcher: Arc<FanoutDispatcher>,
        primary: watch::Receiver<ConnectionState>,
        settings: MonitorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            dispatcher,
            primary,
            settings,
            cancel,
            detector: ChangeDetector::new(),
        }
    }

    pub async fn run(mut self) {
        if !self.wait_for_primary().await {
            return;
        }
        info!("monitoring service started");

        let heartbeat = self.spawn_heartbeat();

        let mut tick = interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    if *self.primary.borrow() != ConnectionState::Connected {
                        debug!("primary connection offline, skipping poll cycle");
                        continue;
                    }
                    self.run_cycle().await;
                }
            }
        }

        let _ = heartbeat.await;
        info!("monitoring service stopped");
    }

    /// Block until the primary messaging connection is up (or shutdown).
    /// If it never connects, cycles never run but the process stays alive
    /// waiting on the supervisor's reconnect loop.
    async fn wait_for_primary(&mut self) -> bool {
        loop {
            if *self.primary.borrow_and_update() == ConnectionState::Connected {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.primary.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        let period = self.settings.heartbeat_interval;
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => info!("monitor heartbeat"),
                }
            }
        })
    }

    async fn run_cycle(&mut self) {
        let height = match self.source.latest_height().await {
            Ok(h) => Some(h.0),
            Err(e) => {
                warn!(error = %e, "block height fetch failed");
                None
            }
        };

        match self.detector.observe(height) {
            Transition::NoBaseline => {
                info!(height = height.unwrap_or_default(), "baseline recorded");
            }
            Transition::NoChange => {}
            Transition::Increased { from, to } => {
                info!(from, to, "new block detected");
                self.notify(to).await;
            }
        }
    }

    async fn notify(&self, height: u64) {
        let block = match self.source.latest_block().await {
            Ok(b) => b,
            Err(e) => {
                warn!(height, error = %e, "latest block fetch failed, skipping notification");
                return;
            }
        };

        let text = match format::render_block_notification(&block) {
            Ok(t) => t,
            Err(e) => {
                warn!(height, error = %e, "skipping malformed block");
                return;
            }
        };

        match self.dispatcher.dispatch(&text).await {
            Ok(report) => info!(
                height,
                delivered = report.delivered(),
                transient = report.transient(),
                evicted = report.evicted(),
                "notification dispatched"
            ),
            Err(e) => warn!(height, error = %e, "dispatch aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConnectionGauge, DeliveryChannel, DeliveryOutcome};
    use crate::dispatch::RetryPolicy;
    use crate::domain::{
        BlockHeader, BlockHeight, BlockRecord, Destination, LinkButton, Transaction,
    };
    use crate::errors::Error;
    use crate::ports::RegistryPort;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    struct ScriptedSource {
        heights: Mutex<VecDeque<Option<u64>>>,
        counter_mode: bool,
        last_height: AtomicUsize,
        height_calls: AtomicUsize,
        poll_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_script(samples: &[Option<u64>]) -> Arc<Self> {
            Arc::new(Self {
                heights: Mutex::new(samples.to_vec().into()),
                counter_mode: false,
                last_height: AtomicUsize::new(0),
                height_calls: AtomicUsize::new(0),
                poll_delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn slow_counter(poll_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                heights: Mutex::new(VecDeque::new()),
                counter_mode: true,
                last_height: AtomicUsize::new(0),
                height_calls: AtomicUsize::new(0),
                poll_delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn next_height(&self) -> Result<u64> {
            if self.counter_mode {
                // A fresh height on every poll.
                return Ok(self.height_calls.load(Ordering::SeqCst) as u64 + 100);
            }
            match self.heights.lock().unwrap().pop_front() {
                Some(Some(h)) => Ok(h),
                // Exhausted scripts behave like an unreachable source.
                _ => Err(Error::SourceUnavailable("gateway timeout".to_string())),
            }
        }
    }

    #[async_trait]
    impl SourcePort for ScriptedSource {
        async fn latest_height(&self) -> Result<BlockHeight> {
            let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
            self.height_calls.fetch_add(1, Ordering::SeqCst);

            if !self.poll_delay.is_zero() {
                sleep(self.poll_delay).await;
            }

            let result = self.next_height();
            if let Ok(h) = &result {
                self.last_height.store(*h as usize, Ordering::SeqCst);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result.map(BlockHeight)
        }

        async fn latest_block(&self) -> Result<BlockRecord> {
            let height = self.last_height.load(Ordering::SeqCst) as u64;
            Ok(BlockRecord {
                header: BlockHeader {
                    height: BlockHeight(height),
                    timestamp_nanos: 1_700_000_000_000_000_000,
                },
                transactions: vec![Transaction {
                    recipient: "abcdef0123456789abcdef0123456789".to_string(),
                    timestamp_nanos: 1_700_000_000_000_000_000,
                }],
            })
        }
    }

    struct StubRegistry;

    #[async_trait]
    impl RegistryPort for StubRegistry {
        async fn list(&self) -> Result<Vec<Destination>> {
            Ok(vec![Destination("A".to_string())])
        }

        async fn add(&self, _destination: &Destination) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _destination: &Destination) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingChannel {
        connection: ConnectionGauge,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn connected() -> Arc<Self> {
            let channel = Arc::new(Self {
                connection: ConnectionGauge::new(),
                sent: Mutex::new(Vec::new()),
            });
            channel.connection.set(ConnectionState::Connected);
            channel
        }
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn connection(&self) -> &ConnectionGauge {
            &self.connection
        }

        fn registry_backed(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn resolve_destinations(
            &self,
            registered: &[Destination],
        ) -> Result<Vec<Destination>> {
            Ok(registered.to_vec())
        }

        async fn deliver(
            &self,
            _destination: &Destination,
            text: &str,
            _links: &[LinkButton],
        ) -> DeliveryOutcome {
            self.sent.lock().unwrap().push(text.to_string());
            DeliveryOutcome::Success
        }
    }

    fn build_monitor(
        source: Arc<ScriptedSource>,
        channel: Arc<RecordingChannel>,
        primary: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> BlockMonitor {
        let dispatcher = Arc::new(FanoutDispatcher::new(
            Arc::new(StubRegistry),
            vec![channel],
            Vec::new(),
            RetryPolicy::default(),
            Duration::from_secs(10),
        ));
        BlockMonitor::new(
            source,
            dispatcher,
            primary,
            MonitorSettings {
                poll_interval: Duration::from_secs(10),
                heartbeat_interval: Duration::from_secs(600),
            },
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_poll_sequence_notifies_exactly_twice() {
        let source =
            ScriptedSource::with_script(&[None, Some(5), Some(5), Some(7), Some(6), Some(9)]);
        let channel = RecordingChannel::connected();
        let gauge = ConnectionGauge::new();
        gauge.set(ConnectionState::Connected);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            build_monitor(source, channel.clone(), gauge.subscribe(), cancel.clone()).run(),
        );

        // Six samples at a 10s cadence, plus slack for the dispatch itself.
        sleep(Duration::from_secs(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("Block Number: 7"));
        assert!(sent[1].contains("Block Number: 9"));
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_wait_for_the_primary_connection() {
        let source = ScriptedSource::with_script(&[Some(5)]);
        let channel = RecordingChannel::connected();
        let gauge = ConnectionGauge::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            build_monitor(
                source.clone(),
                channel.clone(),
                gauge.subscribe(),
                cancel.clone(),
            )
            .run(),
        );

        sleep(Duration::from_secs(50)).await;
        assert_eq!(source.height_calls.load(Ordering::SeqCst), 0);

        gauge.set(ConnectionState::Connected);
        sleep(Duration::from_secs(15)).await;
        assert!(source.height_calls.load(Ordering::SeqCst) >= 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_never_overlap() {
        // Each poll takes 25s against a 10s cadence; ticks in between are
        // skipped and at most one cycle is ever in flight.
        let source = ScriptedSource::slow_counter(Duration::from_secs(25));
        let channel = RecordingChannel::connected();
        let gauge = ConnectionGauge::new();
        gauge.set(ConnectionState::Connected);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            build_monitor(
                source.clone(),
                channel.clone(),
                gauge.subscribe(),
                cancel.clone(),
            )
            .run(),
        );

        sleep(Duration::from_secs(120)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(source.height_calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
