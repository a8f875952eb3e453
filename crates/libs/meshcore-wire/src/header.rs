//! Packet header byte.
//!
//! ```text
//!  bit  7 6 | 5 4 3 2 | 1 0
//!      ver  | payload | route
//! ```

const ROUTE_MASK: u8 = 0x03;
const PAYLOAD_SHIFT: u8 = 2;
const PAYLOAD_MASK: u8 = 0x0F;
const VERSION_SHIFT: u8 = 6;
const VERSION_MASK: u8 = 0x03;

/// How a packet travels through the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RouteType {
    TransportFlood = 0x00,
    Flood = 0x01,
    Direct = 0x02,
    TransportDirect = 0x03,
}

impl RouteType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & ROUTE_MASK {
            0x00 => Self::TransportFlood,
            0x01 => Self::Flood,
            0x02 => Self::Direct,
            _ => Self::TransportDirect,
        }
    }

    /// Whether two 16-bit transport codes follow the header.
    pub fn has_transport_codes(self) -> bool {
        matches!(self, Self::TransportFlood | Self::TransportDirect)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportFlood => "TRANSPORT_FLOOD",
            Self::Flood => "FLOOD",
            Self::Direct => "DIRECT",
            Self::TransportDirect => "TRANSPORT_DIRECT",
        }
    }
}

/// Selects the payload decoder.
///
/// Values 0x0C-0x0E are reserved by the protocol and surface as
/// [`PayloadType::Unknown`] carrying the raw 4-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Req,
    Response,
    TxtMsg,
    Ack,
    Advert,
    GrpTxt,
    GrpData,
    AnonReq,
    Path,
    Trace,
    Multipart,
    Control,
    RawCustom,
    Unknown(u8),
}

impl PayloadType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & PAYLOAD_MASK {
            0x00 => Self::Req,
            0x01 => Self::Response,
            0x02 => Self::TxtMsg,
            0x03 => Self::Ack,
            0x04 => Self::Advert,
            0x05 => Self::GrpTxt,
            0x06 => Self::GrpData,
            0x07 => Self::AnonReq,
            0x08 => Self::Path,
            0x09 => Self::Trace,
            0x0A => Self::Multipart,
            0x0B => Self::Control,
            0x0F => Self::RawCustom,
            other => Self::Unknown(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Req => 0x00,
            Self::Response => 0x01,
            Self::TxtMsg => 0x02,
            Self::Ack => 0x03,
            Self::Advert => 0x04,
            Self::GrpTxt => 0x05,
            Self::GrpData => 0x06,
            Self::AnonReq => 0x07,
            Self::Path => 0x08,
            Self::Trace => 0x09,
            Self::Multipart => 0x0A,
            Self::Control => 0x0B,
            Self::RawCustom => 0x0F,
            Self::Unknown(value) => value & PAYLOAD_MASK,
        }
    }

    /// Protocol name, e.g. `TXT_MSG`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Req => "REQ",
            Self::Response => "RESPONSE",
            Self::TxtMsg => "TXT_MSG",
            Self::Ack => "ACK",
            Self::Advert => "ADVERT",
            Self::GrpTxt => "GRP_TXT",
            Self::GrpData => "GRP_DATA",
            Self::AnonReq => "ANON_REQ",
            Self::Path => "PATH",
            Self::Trace => "TRACE",
            Self::Multipart => "MULTIPART",
            Self::Control => "CONTROL",
            Self::RawCustom => "RAW_CUSTOM",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Lower-cased name used as a topic segment.
    pub fn topic_segment(self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHeader {
    pub route_type: RouteType,
    pub payload_type: PayloadType,
    /// 2-bit payload version, 0-3.
    pub payload_version: u8,
}

impl PacketHeader {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            route_type: RouteType::from_bits(byte),
            payload_type: PayloadType::from_bits(byte >> PAYLOAD_SHIFT),
            payload_version: (byte >> VERSION_SHIFT) & VERSION_MASK,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.route_type as u8 & ROUTE_MASK)
            | ((self.payload_type.bits() & PAYLOAD_MASK) << PAYLOAD_SHIFT)
            | ((self.payload_version & VERSION_MASK) << VERSION_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_header_byte_roundtrips() {
        for byte in 0..=u8::MAX {
            assert_eq!(PacketHeader::from_byte(byte).to_byte(), byte, "byte 0x{byte:02x}");
        }
    }

    #[test]
    fn splits_fields_by_bit_position() {
        let header = PacketHeader::from_byte(0b1001_0010);
        assert_eq!(header.route_type, RouteType::Direct);
        assert_eq!(header.payload_type, PayloadType::Advert);
        assert_eq!(header.payload_version, 2);
    }

    #[test]
    fn reserved_payload_values_are_kept() {
        let header = PacketHeader::from_byte(0x0D << 2);
        assert_eq!(header.payload_type, PayloadType::Unknown(0x0D));
        assert_eq!(header.payload_type.topic_segment(), "unknown");
        assert_eq!(header.to_byte(), 0x0D << 2);
    }

    #[test]
    fn only_transport_routes_carry_codes() {
        assert!(RouteType::TransportFlood.has_transport_codes());
        assert!(RouteType::TransportDirect.has_transport_codes());
        assert!(!RouteType::Flood.has_transport_codes());
        assert!(!RouteType::Direct.has_transport_codes());
    }

    #[test]
    fn topic_segment_is_lowercase_name() {
        assert_eq!(PayloadType::TxtMsg.topic_segment(), "txt_msg");
        assert_eq!(PayloadType::RawCustom.topic_segment(), "raw_custom");
    }
}
