use crate::types::MessageType;
use serde::{Deserialize, Serialize};

/// Packet layout used by the bus variant in front of the board.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// SPI: `[address][opcode][payload...]`.
    #[default]
    Direct,
    /// Serial: `[address][checksum][len][opcode][payload...]`, where `len` and
    /// `checksum` cover the body (opcode and payload).
    Checksummed,
}

impl Framing {
    /// Bytes in front of the payload.
    pub fn header_len(self) -> usize {
        match self {
            Framing::Direct => 2,
            Framing::Checksummed => 4,
        }
    }
}

/// Build a request packet for `msg` addressed to `address`.
///
/// # Panics
///
/// Panics when `payload` is not exactly `msg.payload_size` bytes. Payloads are
/// built from the message table, so a mismatch is a bug in the caller.
pub fn encode(framing: Framing, address: u8, msg: &MessageType, payload: &[u8]) -> Vec<u8> {
    assert_eq!(
        payload.len(),
        msg.payload_size,
        "{:?} carries {} payload bytes",
        msg.opcode,
        msg.payload_size
    );
    let mut out = Vec::with_capacity(framing.header_len() + payload.len());
    out.push(address);
    match framing {
        Framing::Direct => {
            out.push(msg.opcode.code());
        }
        Framing::Checksummed => {
            // Body length fits a byte for every message in the table
            let len = (1 + payload.len()) as u8;
            let body_sum = payload
                .iter()
                .fold(msg.opcode.code(), |acc, b| acc.wrapping_add(*b));
            out.push(checksum(address, len, body_sum));
            out.push(len);
            out.push(msg.opcode.code());
        }
    }
    out.extend_from_slice(payload);
    out
}

/// `(address + len + Σbody) mod 256`.
fn checksum(address: u8, len: u8, body_sum: u8) -> u8 {
    address.wrapping_add(len).wrapping_add(body_sum)
}

/// Running checksum of a serial packet over an arbitrary body.
pub fn body_checksum(address: u8, body: &[u8]) -> u8 {
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    checksum(address, body.len() as u8, sum)
}

/// Strip the framing header from an encoded request, returning the payload.
pub fn payload_of(framing: Framing, packet: &[u8]) -> Option<&[u8]> {
    packet.get(framing.header_len()..)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MessageType, Opcode};

    #[test]
    fn direct_layout_is_address_opcode_payload() {
        let msg = Opcode::SetMotorPower.message_type();
        let packet = encode(Framing::Direct, 0x01, &msg, &[0x02, 0x9C]);
        assert_eq!(packet, vec![0x01, 21, 0x02, 0x9C]);
        assert_eq!(payload_of(Framing::Direct, &packet), Some(&[0x02, 0x9C][..]));
    }

    #[test]
    fn every_table_entry_encodes_to_header_plus_declared_size() {
        for op in Opcode::ALL {
            let msg = op.message_type();
            let payload = msg.filler();
            for framing in [Framing::Direct, Framing::Checksummed] {
                let packet = encode(framing, 0x01, &msg, &payload);
                assert_eq!(packet.len(), framing.header_len() + msg.payload_size);
                assert_eq!(payload_of(framing, &packet), Some(&payload[..]));
            }
        }
    }

    #[test]
    fn checksummed_layout_covers_opcode_and_payload() {
        let msg = MessageType::new(Opcode::SetMotorPower, 2, Direction::Command);
        let packet = encode(Framing::Checksummed, 0x01, &msg, &[0x01, 0x64]);
        // 0x01 + 3 + (21 + 0x01 + 0x64)
        assert_eq!(packet, vec![0x01, 0x7E, 3, 21, 0x01, 0x64]);
        assert_eq!(packet[1], body_checksum(0x01, &packet[3..]));
    }

    #[test]
    fn checksum_wraps_and_detects_single_byte_corruption() {
        let body = [0xFF, 0xFF, 0x10];
        let sum = body_checksum(0xF0, &body);
        assert_eq!(sum, (0xF0u32 + 3 + 0xFF + 0xFF + 0x10) as u8);
        for i in 0..body.len() {
            let mut corrupt = body;
            corrupt[i] ^= 0x01;
            assert_ne!(body_checksum(0xF0, &corrupt), sum);
        }
    }

    #[test]
    #[should_panic]
    fn wrong_payload_size_is_a_contract_violation() {
        let msg = Opcode::SetSensorType.message_type();
        let _ = encode(Framing::Direct, 0x01, &msg, &[0x01]);
    }
}
