//! Packet extraction from companion console lines.
//!
//! Recognised, in order:
//! - `RX:<hex>` / `PKT:<hex>`: everything after the first colon is hex
//! - a bare line of hex digits and spaces
//!
//! Anything else carries no packet. Malformed hex also yields no packet.

const PREFIXES: [&str; 2] = ["RX:", "PKT:"];

/// Extract packet bytes from one console line, if it carries any.
pub fn extract_packet_bytes(line: &str) -> Option<Vec<u8>> {
    let line = line.trim();

    if PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        let (_, hex_part) = line.split_once(':')?;
        return decode_spaced_hex(hex_part).filter(|bytes| !bytes.is_empty());
    }

    if line.chars().all(|ch| ch.is_ascii_hexdigit() || ch == ' ') {
        let compact: String = line.chars().filter(|ch| *ch != ' ').collect();
        return hex::decode(compact).ok().filter(|bytes| !bytes.is_empty());
    }

    None
}

/// Same as [`extract_packet_bytes`] for a raw line that may not be UTF-8.
pub fn extract_from_raw_line(raw: &[u8]) -> Option<Vec<u8>> {
    extract_packet_bytes(&String::from_utf8_lossy(raw))
}

// Whitespace may separate bytes but not split one.
fn decode_spaced_hex(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 2);
    for token in input.split_whitespace() {
        out.extend(hex::decode(token).ok()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_prefix_with_spaced_hex() {
        assert_eq!(extract_packet_bytes("RX: 04 00 41"), Some(vec![0x04, 0x00, 0x41]));
    }

    #[test]
    fn pkt_prefix_with_compact_hex() {
        assert_eq!(extract_packet_bytes("PKT:0500aabb\r\n"), Some(vec![0x05, 0x00, 0xAA, 0xBB]));
    }

    #[test]
    fn bare_hex_line() {
        assert_eq!(extract_packet_bytes("05 00 4142"), Some(vec![0x05, 0x00, 0x41, 0x42]));
        assert_eq!(extract_packet_bytes("0500ABcd"), Some(vec![0x05, 0x00, 0xAB, 0xCD]));
    }

    #[test]
    fn prefixed_line_with_bad_hex_yields_nothing() {
        assert_eq!(extract_packet_bytes("RX: zz"), None);
        assert_eq!(extract_packet_bytes("RX: 0"), None);
        assert_eq!(extract_packet_bytes("RX: 0 5"), None);
    }

    #[test]
    fn odd_length_bare_hex_yields_nothing() {
        assert_eq!(extract_packet_bytes("abc"), None);
    }

    #[test]
    fn log_lines_and_blank_lines_are_ignored() {
        assert_eq!(extract_packet_bytes("DEBUG: radio init ok"), None);
        assert_eq!(extract_packet_bytes("rx: 0500"), None);
        assert_eq!(extract_packet_bytes(""), None);
        assert_eq!(extract_packet_bytes("   "), None);
        assert_eq!(extract_packet_bytes("RX:"), None);
    }

    #[test]
    fn raw_line_with_invalid_utf8_is_ignored() {
        assert_eq!(extract_from_raw_line(&[0xFF, b'0', b'5']), None);
        assert_eq!(extract_from_raw_line(b"RX: 0500\n"), Some(vec![0x05, 0x00]));
    }
}
