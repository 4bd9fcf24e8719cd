use std::{sync::Arc, time::Duration};

use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bilmon_core::{
    channel::DeliveryChannel,
    config::Config,
    dispatch::{FanoutDispatcher, RetryPolicy},
    format, liveness,
    monitor::{BlockMonitor, MonitorSettings},
    ports::{RegistryPort, SourcePort},
    supervisor::ChannelSupervisor,
};
use bilmon_discord::DiscordChannel;
use bilmon_ledger::{Gateway, GroupStore, LedgerSource};
use bilmon_telegram::{router, TelegramChannel};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), bilmon_core::Error> {
    bilmon_core::logging::init("bilmon")?;

    let cfg = Arc::new(Config::load()?);

    let gateway = Gateway::new(cfg.gateway_host.clone(), cfg.gateway_timeout);
    let source: Arc<dyn SourcePort> =
        Arc::new(LedgerSource::new(gateway.clone(), cfg.source_canister.clone()));
    let registry: Arc<dyn RegistryPort> =
        Arc::new(GroupStore::new(gateway, cfg.registry_canister.clone()));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let telegram = Arc::new(TelegramChannel::new(bot.clone()));

    let mut channels: Vec<Arc<dyn DeliveryChannel>> = vec![telegram.clone()];
    match &cfg.discord_bot_token {
        Some(token) => {
            channels.push(Arc::new(DiscordChannel::new(token.clone(), cfg.send_timeout)));
        }
        None => warn!("DISCORD_BOT_TOKEN not set, guild notifications disabled"),
    }

    let cancel = CancellationToken::new();

    // Liveness endpoint for external process-health checks.
    {
        let cancel = cancel.clone();
        let port = cfg.liveness_port;
        tokio::spawn(async move {
            if let Err(e) = liveness::serve(port, cancel).await {
                error!(error = %e, "liveness endpoint failed");
            }
        });
    }

    let mut supervisors = Vec::new();
    for channel in channels.iter().cloned() {
        supervisors
            .push(ChannelSupervisor::new(channel, cfg.reconnect_delay, cancel.clone()).spawn());
    }

    // Group registration listener (long polling).
    {
        let registry = registry.clone();
        let bot = bot.clone();
        tokio::spawn(async move {
            router::run(bot, registry).await;
        });
    }

    let dispatcher = Arc::new(FanoutDispatcher::new(
        registry,
        channels,
        format::notification_links(),
        RetryPolicy::default(),
        cfg.send_timeout,
    ));
    let monitor = BlockMonitor::new(
        source,
        dispatcher,
        telegram.connection().subscribe(),
        MonitorSettings {
            poll_interval: cfg.poll_interval,
            heartbeat_interval: cfg.heartbeat_interval,
        },
        cancel.clone(),
    );
    let monitor_handle = tokio::spawn(monitor.run());

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    // Let an in-flight cycle finish, then abandon.
    if tokio::time::timeout(SHUTDOWN_GRACE, monitor_handle)
        .await
        .is_err()
    {
        warn!("monitor did not stop within grace period, abandoning");
    }
    for handle in supervisors {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
