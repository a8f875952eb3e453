#![allow(dead_code)]

use async_trait::async_trait;
use meshcore_bridge::channel::{BusChannel, ByteChannel, ChannelError, QoS};
use meshcore_bridge::config::{BridgeConfig, BusSettings, ConfigStore, SerialSettings};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SerialConnect(String),
    SerialConnectFailed(String),
    SerialDisconnect,
    BusConnect(String),
    BusConnectFailed(String),
    BusDisconnect,
    Publish { topic: String, qos: QoS, retain: bool, payload: String },
    Status(Option<bool>, Option<bool>),
}

/// Ordered record of everything the doubles were asked to do.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn since(&self, mark: usize) -> Vec<Event> {
        self.0.lock().unwrap()[mark..].to_vec()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Publish { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }
}

pub enum ScriptedRead {
    Packet(Vec<u8>),
    Lost,
}

#[derive(Clone, Default)]
pub struct SerialScript(Arc<Mutex<SerialScriptState>>);

#[derive(Default)]
struct SerialScriptState {
    reads: VecDeque<ScriptedRead>,
    failing_connects: usize,
}

impl SerialScript {
    pub fn push_packet(&self, bytes: &[u8]) {
        self.0.lock().unwrap().reads.push_back(ScriptedRead::Packet(bytes.to_vec()));
    }

    pub fn push_lost(&self) {
        self.0.lock().unwrap().reads.push_back(ScriptedRead::Lost);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.0.lock().unwrap().failing_connects = count;
    }
}

pub struct FakeSerial {
    script: SerialScript,
    log: EventLog,
    connected: bool,
}

impl FakeSerial {
    pub fn new(script: SerialScript, log: EventLog) -> Self {
        Self { script, log, connected: false }
    }
}

#[async_trait]
impl ByteChannel for FakeSerial {
    async fn connect(&mut self, settings: &SerialSettings) -> Result<(), ChannelError> {
        let mut script = self.script.0.lock().unwrap();
        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            self.log.push(Event::SerialConnectFailed(settings.device.clone()));
            return Err(ChannelError::NotConnected);
        }
        self.connected = true;
        self.log.push(Event::SerialConnect(settings.device.clone()));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.log.push(Event::SerialDisconnect);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn next_packet_bytes(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        match self.script.0.lock().unwrap().reads.pop_front() {
            Some(ScriptedRead::Packet(bytes)) => Ok(Some(bytes)),
            Some(ScriptedRead::Lost) => Err(ChannelError::Eof),
            None => Ok(None),
        }
    }
}

pub struct FakeBus {
    log: EventLog,
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    failing_publishes: AtomicBool,
}

impl FakeBus {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            connected: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            failing_publishes: AtomicBool::new(false),
        }
    }

    /// Simulates the broker going away underneath the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.failing_publishes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusChannel for FakeBus {
    async fn connect(&self, settings: &BusSettings) -> Result<(), ChannelError> {
        let broker = format!("{}:{}", settings.broker, settings.port);
        if self.failing_connects.load(Ordering::SeqCst) > 0 {
            self.failing_connects.fetch_sub(1, Ordering::SeqCst);
            self.log.push(Event::BusConnectFailed(broker));
            return Err(ChannelError::Timeout { operation: "mqtt connect", timeout_ms: 5_000 });
        }
        self.connected.store(true, Ordering::SeqCst);
        self.log.push(Event::BusConnect(broker));
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.log.push(Event::BusDisconnect);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ChannelError> {
        if self.failing_publishes.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.log.push(Event::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload: String::from_utf8(payload).unwrap(),
        });
        Ok(())
    }
}

/// In-memory configuration collaborator. Tests swap the snapshot through a
/// [`StoreHandle`] after the store has been moved into the relay.
pub struct FakeStore {
    handle: StoreHandle,
    log: EventLog,
}

#[derive(Clone)]
pub struct StoreHandle {
    config: Arc<Mutex<BridgeConfig>>,
    changed: Arc<AtomicBool>,
}

impl StoreHandle {
    pub fn replace(&self, config: BridgeConfig) {
        *self.config.lock().unwrap() = config;
        self.changed.store(true, Ordering::SeqCst);
    }

    pub fn current(&self) -> BridgeConfig {
        self.config.lock().unwrap().clone()
    }
}

impl FakeStore {
    pub fn new(config: BridgeConfig, log: EventLog) -> (Self, StoreHandle) {
        let handle = StoreHandle {
            config: Arc::new(Mutex::new(config)),
            changed: Arc::new(AtomicBool::new(false)),
        };
        (Self { handle: handle.clone(), log }, handle)
    }
}

impl ConfigStore for FakeStore {
    fn load(&mut self) -> BridgeConfig {
        self.handle.changed.store(false, Ordering::SeqCst);
        self.handle.current()
    }

    fn has_changed(&mut self) -> bool {
        self.handle.changed.load(Ordering::SeqCst)
    }

    fn update_status(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>) {
        self.log.push(Event::Status(serial_connected, mqtt_connected));
    }
}

pub fn config(serial_enabled: bool, bus_enabled: bool) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.serial.enabled = serial_enabled;
    config.bus.enabled = bus_enabled;
    config
}
