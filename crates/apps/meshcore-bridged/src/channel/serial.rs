use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{ByteChannel, ChannelError, LineFramer};
use crate::config::SerialSettings;

/// Serial link to the companion radio, 8N1 without flow control.
#[derive(Default)]
pub struct SerialChannel {
    device: Option<String>,
    framer: Option<LineFramer<BufReader<SerialStream>>>,
}

impl SerialChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteChannel for SerialChannel {
    async fn connect(&mut self, settings: &SerialSettings) -> Result<(), ChannelError> {
        self.disconnect().await;

        log::info!(
            "serial: connecting device={} baud_rate={}",
            settings.device,
            settings.baud_rate
        );
        let read_timeout = Duration::from_millis(settings.read_timeout_ms);
        let port = tokio_serial::new(settings.device.clone(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open_native_async()?;

        log::info!("serial: opened device={} baud_rate={}", settings.device, settings.baud_rate);
        self.device = Some(settings.device.clone());
        self.framer = Some(LineFramer::new(BufReader::new(port), read_timeout));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.framer.take().is_some() {
            log::info!("serial: closed device={}", self.device.as_deref().unwrap_or("<unknown>"));
        }
        self.device = None;
    }

    fn is_connected(&self) -> bool {
        self.framer.is_some()
    }

    async fn next_packet_bytes(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let framer = self.framer.as_mut().ok_or(ChannelError::NotConnected)?;
        match framer.next_packet_bytes().await {
            Ok(packet) => Ok(packet),
            Err(err) => {
                log::warn!(
                    "serial: read failed device={} err={}",
                    self.device.as_deref().unwrap_or("<unknown>"),
                    err
                );
                self.framer = None;
                Err(err)
            }
        }
    }
}
