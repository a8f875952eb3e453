use super::Args;
use anyhow::Context;
use meshcore_bridge::channel::{MqttBus, SerialChannel};
use meshcore_bridge::config::{BridgeConfig, ConfigStore, FileConfigStore, StaticConfigStore};
use meshcore_bridge::relay::{Relay, RelayTimings};
use meshcore_bridge::state::SharedState;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(super) struct BootstrapContext {
    relay: Relay<SerialChannel, MqttBus, Box<dyn ConfigStore>>,
    cancel: CancellationToken,
}

pub(super) fn bootstrap(args: &Args) -> anyhow::Result<BootstrapContext> {
    let store: Box<dyn ConfigStore> = match args.config.as_ref() {
        Some(path) => {
            BridgeConfig::from_path(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            let store = FileConfigStore::new(path.clone());
            log::info!(
                "config: using path={} status={}",
                store.path().display(),
                store.status_path().display()
            );
            Box::new(store)
        }
        None => {
            let config = BridgeConfig::from_env().context("invalid environment configuration")?;
            log::info!("config: using environment");
            Box::new(StaticConfigStore::new(config))
        }
    };

    let timings = RelayTimings {
        stats_interval: Duration::from_secs(args.stats_interval_secs.max(1)),
        config_check_interval: Duration::from_secs(args.config_check_interval_secs.max(1)),
        ..RelayTimings::default()
    };
    let relay = Relay::new(
        SerialChannel::new(),
        Arc::new(MqttBus::new()),
        store,
        SharedState::default(),
        timings,
    );
    Ok(BootstrapContext { relay, cancel: CancellationToken::new() })
}

pub(super) async fn run(context: BootstrapContext) {
    let BootstrapContext { mut relay, cancel } = context;
    tokio::spawn(wait_for_shutdown(cancel.clone()));
    relay.run(cancel).await;

    let stats = relay.state().snapshot();
    log::info!(
        "relay: exiting received={} parsed={} published={} errors={}",
        stats.packets_received,
        stats.packets_parsed,
        stats.packets_published,
        stats.errors
    );
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupted(tokio::signal::ctrl_c()) => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                log::warn!("relay: SIGTERM handler unavailable err={}", err);
                interrupted(tokio::signal::ctrl_c()).await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        interrupted(tokio::signal::ctrl_c()).await;
    }
    log::info!("relay: shutdown requested");
    cancel.cancel();
}

/// Resolves on Ctrl-C. If the handler cannot be installed this never
/// resolves, leaving shutdown to other signals.
async fn interrupted<F>(ctrl_c: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(err) = ctrl_c.await {
        log::warn!("relay: Ctrl-C handler unavailable err={}", err);
        std::future::pending::<()>().await;
    }
}
