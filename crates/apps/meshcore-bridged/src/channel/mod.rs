//! The two transports the relay manages: the companion serial link and the
//! MQTT bus. Each is driven through a small trait so the relay policy can be
//! exercised without hardware or a broker.

use async_trait::async_trait;
use std::fmt;

use crate::config::{BusSettings, SerialSettings};

pub mod framer;
pub mod mqtt;
pub mod serial;

pub use framer::LineFramer;
pub use mqtt::MqttBus;
pub use serial::SerialChannel;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("mqtt client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("mqtt connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    #[error("end of stream")]
    Eof,

    #[error("not connected")]
    NotConnected,
}

/// Delivery guarantee requested for a bus publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Serial,
    Bus,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Bus => "bus",
        })
    }
}

/// Per-channel lifecycle as tracked by the relay.
///
/// `Error` is transient: a failed connect passes through it and folds back
/// to `Disconnected` so the next scheduled attempt can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ChannelState {
    pub fn initial(enabled: bool) -> Self {
        if enabled {
            Self::Disconnected
        } else {
            Self::Disabled
        }
    }

    /// State after the channel's settings changed. Always drops any live link.
    pub fn reconfigured(self, enabled: bool) -> Self {
        Self::initial(enabled)
    }

    pub fn begin_connect(self) -> Self {
        match self {
            Self::Disconnected => Self::Connecting,
            other => other,
        }
    }

    pub fn connect_succeeded(self) -> Self {
        match self {
            Self::Connecting => Self::Connected,
            other => other,
        }
    }

    pub fn connect_failed(self) -> Self {
        match self {
            Self::Connecting => Self::Error,
            other => other,
        }
    }

    pub fn recover(self) -> Self {
        match self {
            Self::Error => Self::Disconnected,
            other => other,
        }
    }

    pub fn liveness_lost(self) -> Self {
        match self {
            Self::Connected => Self::Disconnected,
            other => other,
        }
    }
}

/// Byte-oriented link to the companion radio.
#[async_trait]
pub trait ByteChannel: Send {
    async fn connect(&mut self, settings: &SerialSettings) -> Result<(), ChannelError>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Next framed packet. `Ok(None)` when no line arrived within the read
    /// timeout or the line carried no packet; `Err` when the link is gone.
    async fn next_packet_bytes(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;
}

/// Publish/subscribe bus. Shared between the relay and the stats task.
#[async_trait]
pub trait BusChannel: Send + Sync {
    async fn connect(&self, settings: &BusSettings) -> Result<(), ChannelError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ChannelError>;
}
