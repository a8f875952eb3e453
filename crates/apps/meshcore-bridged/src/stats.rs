use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{BusChannel, ChannelError, QoS};
use crate::envelope::Topics;
use crate::state::SharedState;

/// Publishes a retained statistics snapshot every `interval` while the bus
/// is up. The topic prefix follows configuration reloads through `topics`.
pub fn spawn_stats_publisher<B>(
    bus: Arc<B>,
    state: SharedState,
    topics: watch::Receiver<Topics>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    B: BusChannel + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !bus.is_connected() {
                continue;
            }
            let topics = topics.borrow().clone();
            if let Err(err) = publish_stats(bus.as_ref(), &state, &topics).await {
                log::error!("stats: publish failed err={}", err);
            }
        }
        log::debug!("stats: publisher stopped");
    })
}

pub async fn publish_stats<B>(
    bus: &B,
    state: &SharedState,
    topics: &Topics,
) -> Result<(), ChannelError>
where
    B: BusChannel + ?Sized,
{
    let snapshot = state.snapshot();
    let body = serde_json::to_vec(&snapshot).map_err(std::io::Error::from)?;
    bus.publish(&topics.stats(), body, QoS::AtLeastOnce, true).await?;
    log::debug!(
        "stats: published received={} parsed={} published={} errors={} known_nodes={}",
        snapshot.packets_received,
        snapshot.packets_parsed,
        snapshot.packets_published,
        snapshot.errors,
        snapshot.known_nodes
    );
    Ok(())
}
