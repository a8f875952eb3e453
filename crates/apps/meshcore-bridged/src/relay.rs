//! The relay orchestrator.
//!
//! One cooperative loop owns the serial channel, the bus handle and the
//! configuration store. Each pass reconciles configuration, watches bus
//! liveness, retries whichever channel is down once its retry deadline has
//! passed, and otherwise pulls one packet off the serial link and relays it.
//! Retries are deadline based: a broker that stays down never delays
//! reading the serial link by more than one connect attempt.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{BusChannel, ByteChannel, ChannelKind, ChannelState};
use crate::config::{BridgeConfig, ConfigStore};
use crate::envelope::Topics;
use crate::pipeline::relay_packet;
use crate::state::SharedState;
use crate::stats::spawn_stats_publisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTimings {
    pub config_check_interval: Duration,
    pub serial_retry: Duration,
    pub bus_retry: Duration,
    /// Pause after a read that produced no packet.
    pub idle: Duration,
    pub stats_interval: Duration,
    /// Upper bound on one sleep while no serial link is open.
    pub max_sleep: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            config_check_interval: Duration::from_secs(10),
            serial_retry: Duration::from_secs(5),
            bus_retry: Duration::from_secs(10),
            idle: Duration::from_millis(10),
            stats_interval: Duration::from_secs(30),
            max_sleep: Duration::from_secs(1),
        }
    }
}

pub struct Relay<S, B, C> {
    serial: S,
    bus: Arc<B>,
    store: C,
    config: BridgeConfig,
    state: SharedState,
    timings: RelayTimings,
    serial_state: ChannelState,
    bus_state: ChannelState,
    next_serial_attempt: Instant,
    next_bus_attempt: Instant,
    last_config_check: Instant,
    topics: Topics,
    topics_tx: watch::Sender<Topics>,
}

impl<S, B, C> Relay<S, B, C>
where
    S: ByteChannel,
    B: BusChannel + 'static,
    C: ConfigStore,
{
    /// Loads the initial snapshot from `store`. Enabled channels are
    /// attempted on the first pass.
    pub fn new(
        serial: S,
        bus: Arc<B>,
        mut store: C,
        state: SharedState,
        timings: RelayTimings,
    ) -> Self {
        let config = store.load();
        let topics = Topics::new(&config.bus.topic_prefix);
        let (topics_tx, _) = watch::channel(topics.clone());
        let now = Instant::now();
        Self {
            serial,
            bus,
            store,
            serial_state: ChannelState::initial(config.serial.enabled),
            bus_state: ChannelState::initial(config.bus.enabled),
            config,
            state,
            timings,
            next_serial_attempt: now,
            next_bus_attempt: now,
            last_config_check: now,
            topics,
            topics_tx,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn channel_state(&self, kind: ChannelKind) -> ChannelState {
        match kind {
            ChannelKind::Serial => self.serial_state,
            ChannelKind::Bus => self.bus_state,
        }
    }

    /// Topics as of the latest configuration; follows reloads.
    pub fn subscribe_topics(&self) -> watch::Receiver<Topics> {
        self.topics_tx.subscribe()
    }

    /// Runs until `cancel` fires, then stops the stats task and closes the
    /// serial link and the bus, in that order.
    pub async fn run(&mut self, cancel: CancellationToken) {
        log::info!(
            "relay: starting serial_enabled={} bus_enabled={} forward_to_mqtt={} prefix={}",
            self.config.serial.enabled,
            self.config.bus.enabled,
            self.config.behavior.forward_to_mqtt,
            self.topics.prefix()
        );
        let stats_stop = CancellationToken::new();
        let stats = spawn_stats_publisher(
            self.bus.clone(),
            self.state.clone(),
            self.subscribe_topics(),
            self.timings.stats_interval,
            stats_stop.clone(),
        );

        while !cancel.is_cancelled() {
            self.run_once(&cancel).await;
        }
        log::info!("relay: main loop stopped");

        stats_stop.cancel();
        if let Err(err) = stats.await {
            log::warn!("relay: stats task ended abnormally err={}", err);
        }
        self.shutdown().await;
    }

    /// One pass of the main loop.
    pub async fn run_once(&mut self, cancel: &CancellationToken) {
        if self.last_config_check.elapsed() >= self.timings.config_check_interval {
            self.last_config_check = Instant::now();
            if self.store.has_changed() {
                log::info!("config: change detected, reloading");
                let config = self.store.load();
                self.apply_config(config).await;
            }
        }

        self.observe_bus_liveness();

        if self.bus_state == ChannelState::Disconnected && Instant::now() >= self.next_bus_attempt {
            self.connect_bus().await;
        }
        if self.serial_state == ChannelState::Disconnected
            && Instant::now() >= self.next_serial_attempt
        {
            self.connect_serial().await;
        }

        if self.serial_state == ChannelState::Connected {
            self.read_and_relay(cancel).await;
        } else {
            self.sleep_until_next_deadline(cancel).await;
        }
    }

    /// Swaps in a new snapshot. Channels whose settings differ are closed
    /// and retried immediately if still enabled.
    pub async fn apply_config(&mut self, config: BridgeConfig) {
        let serial_changed = config.serial_settings() != self.config.serial_settings();
        let bus_changed = config.bus_settings() != self.config.bus_settings();
        let previous = std::mem::replace(&mut self.config, config);

        if serial_changed {
            log::info!(
                "relay: serial settings changed enabled={} device={}",
                self.config.serial.enabled,
                self.config.serial.device
            );
            self.reset_serial().await;
        }
        if bus_changed {
            log::info!(
                "relay: bus settings changed enabled={} broker={}:{}",
                self.config.bus.enabled,
                self.config.bus.broker,
                self.config.bus.port
            );
            self.reset_bus().await;
            if previous.bus.topic_prefix != self.config.bus.topic_prefix {
                self.topics = Topics::new(&self.config.bus.topic_prefix);
                self.topics_tx.send_replace(self.topics.clone());
            }
        }
    }

    /// Closes both channels: serial first, then the bus.
    pub async fn shutdown(&mut self) {
        self.serial.disconnect().await;
        if self.serial_state == ChannelState::Connected {
            self.mark_serial_down();
        }
        self.serial_state = ChannelState::initial(self.config.serial.enabled);

        self.bus.disconnect().await;
        if self.bus_state == ChannelState::Connected {
            self.mark_bus_down();
        }
        self.bus_state = ChannelState::initial(self.config.bus.enabled);
        log::info!("relay: shutdown complete");
    }

    async fn reset_serial(&mut self) {
        if self.serial_state == ChannelState::Connected {
            self.serial.disconnect().await;
            self.mark_serial_down();
        }
        self.serial_state = self.serial_state.reconfigured(self.config.serial.enabled);
        self.next_serial_attempt = Instant::now();
    }

    async fn reset_bus(&mut self) {
        if self.bus_state == ChannelState::Connected {
            self.bus.disconnect().await;
            self.mark_bus_down();
        }
        self.bus_state = self.bus_state.reconfigured(self.config.bus.enabled);
        self.next_bus_attempt = Instant::now();
    }

    async fn connect_serial(&mut self) {
        self.serial_state = self.serial_state.begin_connect();
        match self.serial.connect(&self.config.serial).await {
            Ok(()) => {
                self.serial_state = self.serial_state.connect_succeeded();
                self.state.set_serial_connected(true);
                self.store.update_status(Some(true), None);
            }
            Err(err) => {
                log::warn!(
                    "relay: serial connect failed device={} err={} retry_in={:?}",
                    self.config.serial.device,
                    err,
                    self.timings.serial_retry
                );
                self.serial_state = self.serial_state.connect_failed();
                self.mark_serial_down();
                self.serial_state = self.serial_state.recover();
                self.next_serial_attempt = Instant::now() + self.timings.serial_retry;
            }
        }
    }

    async fn connect_bus(&mut self) {
        self.bus_state = self.bus_state.begin_connect();
        match self.bus.connect(&self.config.bus).await {
            Ok(()) => {
                self.bus_state = self.bus_state.connect_succeeded();
                self.state.set_mqtt_connected(true);
                self.store.update_status(None, Some(true));
            }
            Err(err) => {
                log::warn!(
                    "relay: bus connect failed broker={}:{} err={} retry_in={:?}",
                    self.config.bus.broker,
                    self.config.bus.port,
                    err,
                    self.timings.bus_retry
                );
                self.bus_state = self.bus_state.connect_failed();
                self.mark_bus_down();
                self.bus_state = self.bus_state.recover();
                self.next_bus_attempt = Instant::now() + self.timings.bus_retry;
            }
        }
    }

    fn observe_bus_liveness(&mut self) {
        if self.bus_state != ChannelState::Connected || self.bus.is_connected() {
            return;
        }
        log::warn!("relay: bus connection lost, retry_in={:?}", self.timings.bus_retry);
        self.bus_state = self.bus_state.liveness_lost();
        self.mark_bus_down();
        self.next_bus_attempt = Instant::now() + self.timings.bus_retry;
    }

    async fn read_and_relay(&mut self, cancel: &CancellationToken) {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = self.serial.next_packet_bytes() => read,
        };
        match read {
            Ok(Some(bytes)) => {
                let forward = self.config.behavior.forward_to_mqtt
                    && self.bus_state == ChannelState::Connected
                    && self.bus.is_connected();
                let sink = forward.then_some((self.bus.as_ref(), &self.topics));
                let outcome =
                    relay_packet(&bytes, &self.state, sink, OffsetDateTime::now_utc()).await;
                log::debug!("relay: packet outcome={:?}", outcome);
            }
            Ok(None) => tokio::time::sleep(self.timings.idle).await,
            Err(err) => {
                log::warn!(
                    "relay: serial link lost device={} err={} retry_in={:?}",
                    self.config.serial.device,
                    err,
                    self.timings.serial_retry
                );
                self.serial.disconnect().await;
                self.serial_state = self.serial_state.liveness_lost();
                self.mark_serial_down();
                self.next_serial_attempt = Instant::now() + self.timings.serial_retry;
            }
        }
    }

    async fn sleep_until_next_deadline(&self, cancel: &CancellationToken) {
        let now = Instant::now();
        let mut wake = self.last_config_check + self.timings.config_check_interval;
        if self.serial_state == ChannelState::Disconnected {
            wake = wake.min(self.next_serial_attempt);
        }
        if self.bus_state == ChannelState::Disconnected {
            wake = wake.min(self.next_bus_attempt);
        }
        let wake = wake.min(now + self.timings.max_sleep).max(now);
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    fn mark_serial_down(&mut self) {
        self.state.set_serial_connected(false);
        self.store.update_status(Some(false), None);
    }

    fn mark_bus_down(&mut self) {
        self.state.set_mqtt_connected(false);
        self.store.update_status(None, Some(false));
    }
}
