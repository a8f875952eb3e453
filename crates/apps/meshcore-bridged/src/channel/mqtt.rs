use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet as MqttPacket};
use tokio::task::JoinHandle;

use super::{BusChannel, ChannelError, QoS};
use crate::config::BusSettings;
use crate::envelope::Topics;

const REQUEST_CAPACITY: usize = 64;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

struct MqttSession {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    broker: String,
}

/// MQTT bus backed by `rumqttc`.
///
/// Once connected, a listener task drives the client event loop, logs
/// messages arriving on the command topic and clears the connected flag on
/// the first connection error. Reconnecting is left to the relay.
#[derive(Default)]
pub struct MqttBus {
    session: Mutex<Option<MqttSession>>,
}

impl MqttBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_session(&self) -> Option<MqttSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn client(&self) -> Option<(AsyncClient, Arc<AtomicBool>)> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| (session.client.clone(), session.connected.clone()))
    }
}

#[async_trait]
impl BusChannel for MqttBus {
    async fn connect(&self, settings: &BusSettings) -> Result<(), ChannelError> {
        self.disconnect().await;

        log::info!("bus: connecting broker={}:{}", settings.broker, settings.port);
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.broker.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let Some((username, password)) = settings.credentials() {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let timeout_ms = settings.connect_timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout_ms), wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| ChannelError::Timeout { operation: "mqtt connect", timeout_ms })??;

        let topics = Topics::new(&settings.topic_prefix);
        client.subscribe(topics.commands(), rumqttc::QoS::AtMostOnce).await?;

        let connected = Arc::new(AtomicBool::new(true));
        let listener = tokio::spawn(run_listener(eventloop, connected.clone(), topics));
        let broker = format!("{}:{}", settings.broker, settings.port);
        log::info!("bus: connected broker={}", broker);

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(MqttSession { client, connected, listener, broker });
        if let Some(previous) = previous {
            previous.listener.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(session) = self.take_session() else {
            return;
        };
        session.connected.store(false, Ordering::SeqCst);
        if let Err(err) = session.client.try_disconnect() {
            log::debug!("bus: disconnect request failed broker={} err={}", session.broker, err);
        }
        let mut listener = session.listener;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut listener).await.is_err() {
            listener.abort();
        }
        log::info!("bus: closed broker={}", session.broker);
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ChannelError> {
        let (client, connected) = self.client().ok_or(ChannelError::NotConnected)?;
        if !connected.load(Ordering::SeqCst) {
            return Err(ChannelError::NotConnected);
        }
        tokio::time::timeout(PUBLISH_TIMEOUT, client.publish(topic, qos.into(), retain, payload))
            .await
            .map_err(|_| ChannelError::Timeout {
                operation: "mqtt publish",
                timeout_ms: PUBLISH_TIMEOUT.as_millis() as u64,
            })??;
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ChannelError> {
    loop {
        if let Event::Incoming(MqttPacket::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn run_listener(mut eventloop: EventLoop, connected: Arc<AtomicBool>, topics: Topics) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(MqttPacket::Publish(message))) => {
                if topics.is_command(&message.topic) {
                    log::info!(
                        "bus: command topic={} payload={}",
                        message.topic,
                        String::from_utf8_lossy(&message.payload)
                    );
                }
            }
            Ok(Event::Incoming(MqttPacket::Disconnect)) => {
                log::warn!("bus: broker closed the session");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if connected.load(Ordering::SeqCst) {
                    log::warn!("bus: connection lost err={}", err);
                }
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}
