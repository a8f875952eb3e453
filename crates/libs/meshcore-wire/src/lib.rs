//! # meshcore-wire
//!
//! Decoder for the MeshCore over-the-air packet format, as relayed by a
//! companion radio over its serial console.
//!
//! The crate is pure: it never performs I/O, never decrypts ciphertext and
//! never verifies advertisement signatures. Callers hand it bytes and get a
//! structured [`Packet`] or a [`DecodeError`] back.
//!
//! ## Packet layout
//!
//! ```text
//! [header:1][transport_codes:4?][path_len:1][path:path_len][payload:rest]
//!  route/type/version   u16le x2    n            1 byte/hop
//! ```
//!
//! Transport codes are only present for `TRANSPORT_FLOOD` and
//! `TRANSPORT_DIRECT` routes.
//!
//! ## Example
//!
//! ```rust
//! use meshcore_wire::{decode, framing, DecodedPayload, PayloadType, RouteType};
//!
//! let bytes = framing::extract_packet_bytes("RX: 05 00 41").unwrap();
//! let packet = decode(&bytes).unwrap();
//! assert_eq!(packet.header.route_type, RouteType::Flood);
//! assert_eq!(packet.header.payload_type, PayloadType::Response);
//! assert_eq!(packet.decoded, DecodedPayload::Raw(vec![0x41]));
//! ```

pub mod framing;
pub mod header;
pub mod packet;
pub mod payload;

pub use header::{PacketHeader, PayloadType, RouteType};
pub use packet::{decode, DecodeError, Packet, PacketField};
pub use payload::{
    channel_hash, node_hash, Acknowledgment, Advertisement, AppData, DecodedPayload, GroupText,
    NodeType, PayloadError, TextMessage,
};

/// Maximum number of hops a path may record.
pub const MAX_PATH_SIZE: usize = 64;

/// Nominal maximum payload size. Longer payloads decode but are flagged.
pub const MAX_PACKET_PAYLOAD: usize = 184;
