//! Payload decoders keyed by [`PayloadType`].
//!
//! Ciphertext is carried through opaque and advertisement signatures are not
//! checked. A payload shorter than its fixed prefix yields
//! [`DecodedPayload::Invalid`] instead of failing the whole packet.

use sha2::{Digest, Sha256};

use crate::header::PayloadType;

const PUBLIC_KEY_LEN: usize = 32;
const TIMESTAMP_LEN: usize = 4;
const SIGNATURE_LEN: usize = 64;
const ADVERT_MIN_LEN: usize = PUBLIC_KEY_LEN + TIMESTAMP_LEN + SIGNATURE_LEN;
const TEXT_MIN_LEN: usize = 4;
const GROUP_TEXT_MIN_LEN: usize = 3;
const ACK_LEN: usize = 4;

const FLAG_IS_CHAT: u8 = 0x01;
const FLAG_IS_REPEATER: u8 = 0x02;
const FLAG_IS_ROOM_SERVER: u8 = 0x03;
const FLAG_IS_SENSOR: u8 = 0x04;
const FLAG_HAS_LOCATION: u8 = 0x10;
const FLAG_HAS_FEATURE1: u8 = 0x20;
const FLAG_HAS_FEATURE2: u8 = 0x40;
const FLAG_HAS_NAME: u8 = 0x80;

const LOCATION_LEN: usize = 8;
const FEATURE_LEN: usize = 2;
const COORDINATE_SCALE: f64 = 1_000_000.0;

/// Payload-level decode failure. The packet itself still decodes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Advertisement too short")]
    AdvertisementTooShort { len: usize },

    #[error("Text message too short")]
    TextMessageTooShort { len: usize },

    #[error("Group text too short")]
    GroupTextTooShort { len: usize },

    #[error("ACK too short")]
    AckTooShort { len: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Advertisement(Advertisement),
    TextMessage(TextMessage),
    GroupText(GroupText),
    Acknowledgment(Acknowledgment),
    /// Every other payload type, unparsed.
    Raw(Vec<u8>),
    Invalid(PayloadError),
}

impl DecodedPayload {
    pub fn decode(payload_type: PayloadType, payload: &[u8]) -> Self {
        let decoded = match payload_type {
            PayloadType::Advert => Advertisement::decode(payload).map(Self::Advertisement),
            PayloadType::TxtMsg => TextMessage::decode(payload).map(Self::TextMessage),
            PayloadType::GrpTxt => GroupText::decode(payload).map(Self::GroupText),
            PayloadType::Ack => Acknowledgment::decode(payload).map(Self::Acknowledgment),
            _ => Ok(Self::Raw(payload.to_vec())),
        };
        decoded.unwrap_or_else(Self::Invalid)
    }

    pub fn as_advertisement(&self) -> Option<&Advertisement> {
        match self {
            Self::Advertisement(advert) => Some(advert),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PayloadError> {
        match self {
            Self::Invalid(err) => Some(err),
            _ => None,
        }
    }
}

/// Node advertisement. The signature is kept verbatim and never verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Seconds, as sent by the advertising node.
    pub timestamp: u32,
    pub signature: [u8; SIGNATURE_LEN],
    pub appdata: Option<AppData>,
}

impl Advertisement {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < ADVERT_MIN_LEN {
            return Err(PayloadError::AdvertisementTooShort { len: payload.len() });
        }

        let (public_key, rest) = payload.split_at(PUBLIC_KEY_LEN);
        let (timestamp, rest) = rest.split_at(TIMESTAMP_LEN);
        let (signature, appdata) = rest.split_at(SIGNATURE_LEN);

        let mut key = [0u8; PUBLIC_KEY_LEN];
        key.copy_from_slice(public_key);
        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(signature);

        Ok(Self {
            public_key: key,
            timestamp: u32::from_le_bytes([timestamp[0], timestamp[1], timestamp[2], timestamp[3]]),
            signature: sig,
            appdata: (!appdata.is_empty()).then(|| AppData::decode(appdata)),
        })
    }

    pub fn node_hash(&self) -> u8 {
        node_hash(&self.public_key)
    }
}

/// Advertised role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Chat,
    Repeater,
    RoomServer,
    Sensor,
    Unknown,
}

impl NodeType {
    /// Resolution order when several role bits are set. First match wins.
    const PRIORITY: [(NodeType, fn(u8) -> bool); 4] = [
        (NodeType::RoomServer, |flags| flags & FLAG_IS_ROOM_SERVER == FLAG_IS_ROOM_SERVER),
        (NodeType::Repeater, |flags| flags & FLAG_IS_REPEATER != 0),
        (NodeType::Sensor, |flags| flags & FLAG_IS_SENSOR != 0),
        (NodeType::Chat, |flags| flags & FLAG_IS_CHAT != 0),
    ];

    pub fn from_flags(flags: u8) -> Self {
        Self::PRIORITY
            .iter()
            .find(|(_, is_match)| is_match(flags))
            .map(|(node_type, _)| *node_type)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Repeater => "repeater",
            Self::RoomServer => "room_server",
            Self::Sensor => "sensor",
            Self::Unknown => "unknown",
        }
    }
}

/// Trailing advertisement section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
    pub flags: u8,
    /// Raw fixed-point latitude and longitude, degrees * 1e6.
    pub location: Option<(i32, i32)>,
    pub name: Option<String>,
}

impl AppData {
    /// Lenient parse: fields that do not fit are skipped, never an error.
    pub fn decode(bytes: &[u8]) -> Self {
        let Some((&flags, _)) = bytes.split_first() else {
            return Self { flags: 0, location: None, name: None };
        };
        let mut offset = 1;

        let mut location = None;
        if flags & FLAG_HAS_LOCATION != 0 && bytes.len() >= offset + LOCATION_LEN {
            let field = &bytes[offset..offset + LOCATION_LEN];
            let lat = i32::from_le_bytes([field[0], field[1], field[2], field[3]]);
            let lon = i32::from_le_bytes([field[4], field[5], field[6], field[7]]);
            location = Some((lat, lon));
            offset += LOCATION_LEN;
        }

        if flags & FLAG_HAS_FEATURE1 != 0 {
            offset += FEATURE_LEN;
        }
        if flags & FLAG_HAS_FEATURE2 != 0 {
            offset += FEATURE_LEN;
        }

        let name = (flags & FLAG_HAS_NAME != 0 && bytes.len() > offset)
            .then(|| decode_name(&bytes[offset..]));

        Self { flags, location, name }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::from_flags(self.flags)
    }

    pub fn latitude(&self) -> Option<f64> {
        self.location.map(|(lat, _)| f64::from(lat) / COORDINATE_SCALE)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.location.map(|(_, lon)| f64::from(lon) / COORDINATE_SCALE)
    }
}

// Invalid UTF-8 sequences are dropped; trailing NUL padding is trimmed.
fn decode_name(bytes: &[u8]) -> String {
    let mut name = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                name.push_str(valid);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                // Prefix is valid by construction.
                name.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match err.error_len() {
                    Some(len) => rest = &after[len..],
                    // Truncated sequence at the end of input.
                    None => break,
                }
            }
        }
    }
    name.trim_end_matches('\0').to_string()
}

/// Encrypted direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub destination_hash: u8,
    pub source_hash: u8,
    pub cipher_mac: u16,
    pub ciphertext: Vec<u8>,
}

impl TextMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < TEXT_MIN_LEN {
            return Err(PayloadError::TextMessageTooShort { len: payload.len() });
        }
        Ok(Self {
            destination_hash: payload[0],
            source_hash: payload[1],
            cipher_mac: u16::from_le_bytes([payload[2], payload[3]]),
            ciphertext: payload[TEXT_MIN_LEN..].to_vec(),
        })
    }
}

/// Encrypted message to a shared-key group channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupText {
    pub channel_hash: u8,
    pub cipher_mac: u16,
    pub ciphertext: Vec<u8>,
}

impl GroupText {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < GROUP_TEXT_MIN_LEN {
            return Err(PayloadError::GroupTextTooShort { len: payload.len() });
        }
        Ok(Self {
            channel_hash: payload[0],
            cipher_mac: u16::from_le_bytes([payload[1], payload[2]]),
            ciphertext: payload[GROUP_TEXT_MIN_LEN..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub checksum: u32,
}

impl Acknowledgment {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < ACK_LEN {
            return Err(PayloadError::AckTooShort { len: payload.len() });
        }
        Ok(Self { checksum: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) })
    }
}

/// One-byte node identifier. Collisions between distinct keys are expected.
pub fn node_hash(public_key: &[u8; PUBLIC_KEY_LEN]) -> u8 {
    public_key[0]
}

/// One-byte group channel identifier: first byte of SHA-256 over the shared key.
pub fn channel_hash(shared_key: &[u8]) -> u8 {
    Sha256::digest(shared_key)[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert_bytes(appdata: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xAB; PUBLIC_KEY_LEN];
        bytes.extend_from_slice(&0x6553_F100_u32.to_le_bytes());
        bytes.extend_from_slice(&[0x5A; SIGNATURE_LEN]);
        bytes.extend_from_slice(appdata);
        bytes
    }

    #[test]
    fn advertisement_without_appdata() {
        let advert = Advertisement::decode(&advert_bytes(&[])).expect("advert");
        assert_eq!(advert.public_key, [0xAB; 32]);
        assert_eq!(advert.timestamp, 0x6553_F100);
        assert_eq!(advert.signature, [0x5A; 64]);
        assert!(advert.appdata.is_none());
        assert_eq!(advert.node_hash(), 0xAB);
    }

    #[test]
    fn advertisement_one_byte_short_is_payload_error() {
        let bytes = advert_bytes(&[]);
        assert_eq!(
            DecodedPayload::decode(PayloadType::Advert, &bytes[..99]),
            DecodedPayload::Invalid(PayloadError::AdvertisementTooShort { len: 99 })
        );
    }

    #[test]
    fn appdata_with_location_and_name() {
        let mut appdata = vec![FLAG_IS_REPEATER | FLAG_HAS_LOCATION | FLAG_HAS_NAME];
        appdata.extend_from_slice(&47_123_456_i32.to_le_bytes());
        appdata.extend_from_slice(&(-122_654_321_i32).to_le_bytes());
        appdata.extend_from_slice(b"ridge-rpt\0\0");

        let parsed = AppData::decode(&appdata);
        assert_eq!(parsed.node_type(), NodeType::Repeater);
        assert_eq!(parsed.location, Some((47_123_456, -122_654_321)));
        assert!((parsed.latitude().expect("lat") - 47.123456).abs() < 1e-9);
        assert!((parsed.longitude().expect("lon") + 122.654321).abs() < 1e-9);
        assert_eq!(parsed.name.as_deref(), Some("ridge-rpt"));
    }

    #[test]
    fn appdata_skips_feature_fields() {
        let mut appdata = vec![FLAG_IS_CHAT | FLAG_HAS_FEATURE1 | FLAG_HAS_FEATURE2 | FLAG_HAS_NAME];
        appdata.extend_from_slice(&[0xFF, 0xFF, 0xEE, 0xEE]);
        appdata.extend_from_slice(b"alice");

        let parsed = AppData::decode(&appdata);
        assert_eq!(parsed.node_type(), NodeType::Chat);
        assert_eq!(parsed.location, None);
        assert_eq!(parsed.name.as_deref(), Some("alice"));
    }

    #[test]
    fn appdata_truncated_location_is_skipped() {
        let appdata = [FLAG_HAS_LOCATION, 0x01, 0x02];
        let parsed = AppData::decode(&appdata);
        assert_eq!(parsed.location, None);
        assert_eq!(parsed.name, None);
    }

    #[test]
    fn appdata_name_drops_invalid_utf8() {
        let appdata = [FLAG_HAS_NAME, b'n', 0xFF, b'o', b'd', b'e', 0x00];
        assert_eq!(AppData::decode(&appdata).name.as_deref(), Some("node"));
    }

    #[test]
    fn appdata_name_keeps_encoded_replacement_character() {
        let appdata = [FLAG_HAS_NAME, b'a', 0xEF, 0xBF, 0xBD, 0xC0, b'b', 0xE2, 0x82];
        assert_eq!(AppData::decode(&appdata).name.as_deref(), Some("a\u{FFFD}b"));
    }

    #[test]
    fn node_type_priority_is_fixed() {
        assert_eq!(NodeType::from_flags(0x02 | 0x10), NodeType::Repeater);
        assert_eq!(NodeType::from_flags(0x03), NodeType::RoomServer);
        assert_eq!(NodeType::from_flags(0x07), NodeType::RoomServer);
        assert_eq!(NodeType::from_flags(0x06), NodeType::Repeater);
        assert_eq!(NodeType::from_flags(0x05), NodeType::Sensor);
        assert_eq!(NodeType::from_flags(0x04), NodeType::Sensor);
        assert_eq!(NodeType::from_flags(0x01), NodeType::Chat);
        assert_eq!(NodeType::from_flags(0x80), NodeType::Unknown);
    }

    #[test]
    fn text_message_fields() {
        let msg = TextMessage::decode(&[0x11, 0x22, 0x34, 0x12, 0xDE, 0xAD]).expect("text");
        assert_eq!(msg.destination_hash, 0x11);
        assert_eq!(msg.source_hash, 0x22);
        assert_eq!(msg.cipher_mac, 0x1234);
        assert_eq!(msg.ciphertext, vec![0xDE, 0xAD]);
    }

    #[test]
    fn minimum_lengths_per_type() {
        assert!(matches!(
            DecodedPayload::decode(PayloadType::TxtMsg, &[1, 2, 3]),
            DecodedPayload::Invalid(PayloadError::TextMessageTooShort { len: 3 })
        ));
        assert!(matches!(
            DecodedPayload::decode(PayloadType::GrpTxt, &[1, 2]),
            DecodedPayload::Invalid(PayloadError::GroupTextTooShort { len: 2 })
        ));
        assert!(matches!(
            DecodedPayload::decode(PayloadType::Ack, &[1, 2, 3]),
            DecodedPayload::Invalid(PayloadError::AckTooShort { len: 3 })
        ));
        let group = GroupText::decode(&[0x9C, 0x01, 0x00]).expect("group text");
        assert_eq!(group.channel_hash, 0x9C);
        assert_eq!(group.cipher_mac, 1);
        assert!(group.ciphertext.is_empty());
    }

    #[test]
    fn ack_checksum_is_little_endian() {
        let ack = Acknowledgment::decode(&[0x78, 0x56, 0x34, 0x12]).expect("ack");
        assert_eq!(ack.checksum, 0x1234_5678);
    }

    #[test]
    fn other_types_pass_through_raw() {
        for payload_type in [PayloadType::Req, PayloadType::RawCustom, PayloadType::Unknown(0x0C)] {
            assert_eq!(
                DecodedPayload::decode(payload_type, &[0x41]),
                DecodedPayload::Raw(vec![0x41])
            );
        }
    }

    #[test]
    fn payload_error_messages() {
        assert_eq!(
            PayloadError::AdvertisementTooShort { len: 0 }.to_string(),
            "Advertisement too short"
        );
        assert_eq!(PayloadError::AckTooShort { len: 0 }.to_string(), "ACK too short");
    }

    #[test]
    fn channel_hash_is_first_sha256_byte() {
        // sha256("") = e3b0c442...
        assert_eq!(channel_hash(b""), 0xE3);
    }
}
