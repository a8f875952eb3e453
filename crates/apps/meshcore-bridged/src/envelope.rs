//! JSON documents published on the bus, and the topics they go to.

use serde_json::{json, Map, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use meshcore_wire::{AppData, DecodedPayload, Packet, PayloadType};

/// Topic layout under the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.trim_end_matches('/').to_string() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn packet(&self, payload_type: PayloadType) -> String {
        format!("{}/packets/{}", self.prefix, payload_type.topic_segment())
    }

    pub fn all_packets(&self) -> String {
        format!("{}/packets/all", self.prefix)
    }

    pub fn stats(&self) -> String {
        format!("{}/bridge/stats", self.prefix)
    }

    /// Subscription filter for inbound commands.
    pub fn commands(&self) -> String {
        format!("{}/command/#", self.prefix)
    }

    pub fn is_command(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix("/command"))
            .map(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(false)
    }
}

pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Envelope for one relayed packet.
pub fn packet_envelope(packet: &Packet, received_at: OffsetDateTime) -> JsonValue {
    json!({
        "timestamp": rfc3339(received_at),
        "route_type": packet.header.route_type.as_str(),
        "payload_type": packet.header.payload_type.as_str(),
        "path": packet.path_hex(),
        "hop_count": packet.hop_count(),
        "parsed": payload_json(&packet.decoded),
    })
}

pub fn payload_json(payload: &DecodedPayload) -> JsonValue {
    match payload {
        DecodedPayload::Advertisement(advert) => json!({
            "type": "advertisement",
            "public_key": hex::encode(advert.public_key),
            "node_hash": format!("{:02x}", advert.node_hash()),
            "timestamp": advert.timestamp,
            "signature": hex::encode(advert.signature),
            "appdata": advert.appdata.as_ref().map(appdata_json),
        }),
        DecodedPayload::TextMessage(message) => json!({
            "type": "text_message",
            "destination_hash": format!("{:02x}", message.destination_hash),
            "source_hash": format!("{:02x}", message.source_hash),
            "cipher_mac": message.cipher_mac,
            "ciphertext": hex::encode(&message.ciphertext),
            "encrypted": true,
        }),
        DecodedPayload::GroupText(group) => json!({
            "type": "group_text",
            "channel_hash": format!("{:02x}", group.channel_hash),
            "cipher_mac": group.cipher_mac,
            "ciphertext": hex::encode(&group.ciphertext),
            "encrypted": true,
        }),
        DecodedPayload::Acknowledgment(ack) => json!({
            "type": "acknowledgment",
            "checksum": format!("{:08x}", ack.checksum),
        }),
        DecodedPayload::Raw(bytes) => json!({ "raw": hex::encode(bytes) }),
        DecodedPayload::Invalid(err) => json!({ "error": err.to_string() }),
    }
}

pub fn appdata_json(appdata: &AppData) -> JsonValue {
    let mut fields = Map::new();
    fields.insert("flags".into(), json!(appdata.flags));
    fields.insert("node_type".into(), json!(appdata.node_type().as_str()));
    if let (Some(latitude), Some(longitude)) = (appdata.latitude(), appdata.longitude()) {
        fields.insert("latitude".into(), json!(latitude));
        fields.insert("longitude".into(), json!(longitude));
    }
    if let Some(name) = appdata.name.as_ref() {
        fields.insert("name".into(), json!(name));
    }
    JsonValue::Object(fields)
}
