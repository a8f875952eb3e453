use std::fmt;

use crate::header::PacketHeader;
use crate::payload::DecodedPayload;
use crate::{MAX_PACKET_PAYLOAD, MAX_PATH_SIZE};

const MIN_PACKET_LEN: usize = 2;
const TRANSPORT_CODES_LEN: usize = 4;

/// Fixed-layout section that did not fit in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketField {
    Packet,
    TransportCodes,
    PathLength,
    Path,
}

impl fmt::Display for PacketField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Packet => "packet",
            Self::TransportCodes => "transport codes",
            Self::PathLength => "path length",
            Self::Path => "path",
        })
    }
}

/// Packet-level decode failure. The whole packet is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet too short for {field}: need {needed} bytes, have {available}")]
    TooShort { field: PacketField, needed: usize, available: usize },
}

/// A decoded packet. Built once by [`decode`] and not mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    /// Present iff the route type is a transport route.
    pub transport_codes: Option<(u16, u16)>,
    /// One identifier per hop, in traversal order.
    pub path: Vec<u8>,
    pub payload: Vec<u8>,
    pub decoded: DecodedPayload,
}

impl Packet {
    pub fn hop_count(&self) -> usize {
        self.path.len()
    }

    /// Path as two-digit lowercase hex strings.
    pub fn path_hex(&self) -> Vec<String> {
        self.path.iter().map(|hop| format!("{hop:02x}")).collect()
    }

    /// Payload exceeds the nominal maximum. Not a decode failure.
    pub fn is_oversized(&self) -> bool {
        self.payload.len() > MAX_PACKET_PAYLOAD
    }

    /// More hops than the nominal path limit. Such packets still decode.
    pub fn is_path_oversized(&self) -> bool {
        self.path.len() > MAX_PATH_SIZE
    }
}

/// Decode one raw packet.
pub fn decode(data: &[u8]) -> Result<Packet, DecodeError> {
    if data.len() < MIN_PACKET_LEN {
        return Err(DecodeError::TooShort {
            field: PacketField::Packet,
            needed: MIN_PACKET_LEN,
            available: data.len(),
        });
    }

    let header = PacketHeader::from_byte(data[0]);
    let mut rest = &data[1..];

    let transport_codes = if header.route_type.has_transport_codes() {
        let codes = take(&mut rest, TRANSPORT_CODES_LEN, PacketField::TransportCodes)?;
        Some((u16::from_le_bytes([codes[0], codes[1]]), u16::from_le_bytes([codes[2], codes[3]])))
    } else {
        None
    };

    let path_len = take(&mut rest, 1, PacketField::PathLength)?[0] as usize;
    let path = take(&mut rest, path_len, PacketField::Path)?.to_vec();

    let payload = rest.to_vec();
    let decoded = DecodedPayload::decode(header.payload_type, &payload);

    Ok(Packet { header, transport_codes, path, payload, decoded })
}

fn take<'a>(input: &mut &'a [u8], len: usize, field: PacketField) -> Result<&'a [u8], DecodeError> {
    if input.len() < len {
        return Err(DecodeError::TooShort { field, needed: len, available: input.len() });
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}
