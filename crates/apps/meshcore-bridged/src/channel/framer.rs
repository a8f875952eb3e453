use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use meshcore_wire::framing::extract_from_raw_line;

use super::ChannelError;

/// Lines longer than this without a newline are noise and get discarded.
pub const MAX_LINE_LEN: usize = 4096;

/// Pulls newline-terminated console lines from a byte stream and extracts
/// hex-encoded packets from them.
///
/// A read that times out keeps whatever part of the line already arrived,
/// so a slow line is completed by a later call.
pub struct LineFramer<R> {
    reader: R,
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl<R> LineFramer<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, read_timeout: Duration) -> Self {
        Self { reader, pending: Vec::with_capacity(256), read_timeout }
    }

    /// Next complete line, `None` on timeout.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let read = self.reader.read_until(b'\n', &mut self.pending);
        match tokio::time::timeout(self.read_timeout, read).await {
            Err(_) => {
                if self.pending.len() > MAX_LINE_LEN {
                    log::debug!("serial: discarding {} bytes without line break", self.pending.len());
                    self.pending.clear();
                }
                Ok(None)
            }
            Ok(Ok(0)) => Err(ChannelError::Eof),
            Ok(Ok(_)) => {
                let line = std::mem::take(&mut self.pending);
                if line.len() > MAX_LINE_LEN {
                    log::debug!("serial: discarding oversized line len={}", line.len());
                    return Ok(None);
                }
                Ok(Some(line))
            }
            Ok(Err(err)) => Err(err.into()),
        }
    }

    /// Next packet body. Lines without a recognised packet yield `None`.
    pub async fn next_packet_bytes(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };
        let packet = extract_from_raw_line(&line);
        if packet.is_none() {
            log::debug!("serial: ignored line {:?}", String::from_utf8_lossy(&line).trim_end());
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::{LineFramer, MAX_LINE_LEN};
    use crate::channel::ChannelError;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn extracts_packets_and_skips_noise() {
        let input: &[u8] = b"boot ok\nRX: 05 00 41\n\n0500aa\n";
        let mut framer = LineFramer::new(BufReader::new(input), Duration::from_millis(50));

        assert_eq!(framer.next_packet_bytes().await.expect("line"), None);
        assert_eq!(framer.next_packet_bytes().await.expect("line"), Some(vec![0x05, 0x00, 0x41]));
        assert_eq!(framer.next_packet_bytes().await.expect("line"), None);
        assert_eq!(framer.next_packet_bytes().await.expect("line"), Some(vec![0x05, 0x00, 0xAA]));
        assert!(matches!(framer.next_packet_bytes().await, Err(ChannelError::Eof)));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_line_survives_timeout() {
        let (reader, mut writer) = tokio::io::duplex(64);
        let mut framer = LineFramer::new(BufReader::new(reader), Duration::from_millis(100));

        writer.write_all(b"PKT: 05 ").await.expect("write head");
        assert_eq!(framer.next_packet_bytes().await.expect("timeout"), None);

        writer.write_all(b"00 7f\n").await.expect("write tail");
        assert_eq!(framer.next_packet_bytes().await.expect("line"), Some(vec![0x05, 0x00, 0x7F]));
    }

    #[tokio::test(start_paused = true)]
    async fn runaway_line_is_dropped() {
        let (reader, mut writer) = tokio::io::duplex(MAX_LINE_LEN * 2);
        let mut framer = LineFramer::new(BufReader::new(reader), Duration::from_millis(100));

        writer.write_all(&vec![b'a'; MAX_LINE_LEN + 10]).await.expect("write noise");
        assert_eq!(framer.next_line().await.expect("timeout"), None);

        writer.write_all(b"RX:0500\n").await.expect("write packet");
        assert_eq!(framer.next_packet_bytes().await.expect("line"), Some(vec![0x05, 0x00]));
    }

    #[tokio::test]
    async fn closed_stream_is_eof() {
        let (reader, writer) = tokio::io::duplex(16);
        drop(writer);
        let mut framer = LineFramer::new(BufReader::new(reader), Duration::from_millis(100));
        assert!(matches!(framer.next_line().await, Err(ChannelError::Eof)));
    }
}
