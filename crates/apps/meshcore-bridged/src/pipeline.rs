use time::OffsetDateTime;

use meshcore_wire::{decode, DecodedPayload, Packet, MAX_PACKET_PAYLOAD, MAX_PATH_SIZE};

use crate::channel::{BusChannel, ChannelError, QoS};
use crate::envelope::{packet_envelope, Topics};
use crate::state::SharedState;

/// What became of one framed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Packet-level decode failure; counted as an error.
    Dropped,
    /// Decoded and counted, but not forwarded.
    Decoded,
    Published,
    PublishFailed,
}

/// Runs one framed buffer through decode, cache update and publish.
///
/// `sink` is `None` when forwarding is off or the bus is down; the packet is
/// still decoded and counted.
pub async fn relay_packet<B>(
    bytes: &[u8],
    state: &SharedState,
    sink: Option<(&B, &Topics)>,
    received_at: OffsetDateTime,
) -> PipelineOutcome
where
    B: BusChannel + ?Sized,
{
    state.record_received();

    let packet = match decode(bytes) {
        Ok(packet) => packet,
        Err(err) => {
            log::warn!("relay: dropped packet len={} err={}", bytes.len(), err);
            state.record_error();
            return PipelineOutcome::Dropped;
        }
    };
    state.record_parsed();

    if packet.is_oversized() {
        log::warn!(
            "relay: oversized payload len={} max={} type={}",
            packet.payload.len(),
            MAX_PACKET_PAYLOAD,
            packet.header.payload_type.as_str()
        );
    }
    if packet.is_path_oversized() {
        log::warn!(
            "relay: oversized path hops={} max={} type={}",
            packet.hop_count(),
            MAX_PATH_SIZE,
            packet.header.payload_type.as_str()
        );
    }
    if let Some(err) = packet.decoded.error() {
        log::warn!("relay: payload error type={} err={}", packet.header.payload_type.as_str(), err);
    }

    observe_packet(&packet, state, received_at);

    let Some((bus, topics)) = sink else {
        return PipelineOutcome::Decoded;
    };
    match publish_packet(bus, topics, &packet, received_at).await {
        Ok(()) => {
            state.record_published();
            PipelineOutcome::Published
        }
        Err(err) => {
            log::error!(
                "relay: publish failed type={} err={}",
                packet.header.payload_type.as_str(),
                err
            );
            state.record_error();
            PipelineOutcome::PublishFailed
        }
    }
}

/// Updates the node cache for adverts and logs a one-line summary.
fn observe_packet(packet: &Packet, state: &SharedState, received_at: OffsetDateTime) {
    log::info!(
        "relay: packet route={} type={} hops={} payload_len={}",
        packet.header.route_type.as_str(),
        packet.header.payload_type.as_str(),
        packet.hop_count(),
        packet.payload.len()
    );
    match &packet.decoded {
        DecodedPayload::Advertisement(advert) => {
            let known_nodes = state.upsert_node(advert, received_at);
            let name = advert.appdata.as_ref().and_then(|appdata| appdata.name.as_deref());
            let node_type = advert.appdata.as_ref().map(|appdata| appdata.node_type().as_str());
            log::info!(
                "relay: advert node={:02x} name={} node_type={} known_nodes={}",
                advert.node_hash(),
                name.unwrap_or("-"),
                node_type.unwrap_or("-"),
                known_nodes
            );
        }
        DecodedPayload::TextMessage(message) => log::info!(
            "relay: text message src={:02x} dst={:02x}",
            message.source_hash,
            message.destination_hash
        ),
        DecodedPayload::GroupText(group) => {
            log::info!("relay: group text channel={:02x}", group.channel_hash)
        }
        DecodedPayload::Acknowledgment(ack) => {
            log::info!("relay: ack checksum={:08x}", ack.checksum)
        }
        DecodedPayload::Raw(_) | DecodedPayload::Invalid(_) => {}
    }
}

/// Type topic first, then the catch-all topic.
async fn publish_packet<B>(
    bus: &B,
    topics: &Topics,
    packet: &Packet,
    received_at: OffsetDateTime,
) -> Result<(), ChannelError>
where
    B: BusChannel + ?Sized,
{
    let body = packet_envelope(packet, received_at).to_string().into_bytes();
    bus.publish(&topics.packet(packet.header.payload_type), body.clone(), QoS::AtLeastOnce, false)
        .await?;
    bus.publish(&topics.all_packets(), body, QoS::AtMostOnce, false).await
}
