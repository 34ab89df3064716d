use crate::error::DecodeError;
use crate::types::REPLY_DATA;

/// Status the board places in every accepted reply.
pub const STATUS_ACCEPTED: u8 = 0xA5;
/// Offset of the status byte in a reply.
pub const STATUS_OFFSET: usize = 3;

/// True iff the reply carries the accepted status. Short replies are failures.
pub fn verify(reply: &[u8]) -> bool {
    reply.get(STATUS_OFFSET) == Some(&STATUS_ACCEPTED)
}

pub fn status_of(reply: &[u8]) -> Option<u8> {
    reply.get(STATUS_OFFSET).copied()
}

fn need(reply: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    reply
        .get(offset..offset + len)
        .ok_or(DecodeError::ShortReply {
            needed: offset + len,
            actual: reply.len(),
        })
}

fn field_end(start: usize, bit_length: u32, available: usize) -> Result<usize, DecodeError> {
    start
        .checked_add(bit_length as usize)
        .ok_or(DecodeError::ShortReply {
            needed: usize::MAX,
            actual: available,
        })
}

/// Reassemble `bit_length` bits starting at absolute bit `start`.
///
/// Bits are numbered LSB-first within each byte (`position / 8` selects the
/// byte, `position % 8` the bit) and shifted into the result from the top,
/// so bit `start + bit_length - 1` becomes the most significant bit.
pub fn decode_bits(bit_length: u32, buf: &[u8], start: usize) -> Result<u32, DecodeError> {
    if bit_length > 32 {
        return Err(DecodeError::FieldTooWide(bit_length));
    }
    let needed = field_end(start, bit_length, buf.len())?.div_ceil(8);
    if buf.len() < needed {
        return Err(DecodeError::ShortReply {
            needed,
            actual: buf.len(),
        });
    }
    let mut value: u32 = 0;
    for i in (0..bit_length as usize).rev() {
        let position = start + i;
        value = (value << 1) | u32::from((buf[position / 8] >> (position % 8)) & 1);
    }
    Ok(value)
}

/// Write the low `bit_length` bits of `value` at absolute bit `start`, using
/// the layout read by [`decode_bits`]. Bits outside the field are untouched.
pub fn encode_bits(
    bit_length: u32,
    value: u32,
    buf: &mut [u8],
    start: usize,
) -> Result<(), DecodeError> {
    if bit_length > 32 {
        return Err(DecodeError::FieldTooWide(bit_length));
    }
    let needed = field_end(start, bit_length, buf.len())?.div_ceil(8);
    if buf.len() < needed {
        return Err(DecodeError::ShortReply {
            needed,
            actual: buf.len(),
        });
    }
    for i in 0..bit_length as usize {
        let position = start + i;
        let mask = 1u8 << (position % 8);
        if (value >> i) & 1 == 1 {
            buf[position / 8] |= mask;
        } else {
            buf[position / 8] &= !mask;
        }
    }
    Ok(())
}

pub fn read_u8(reply: &[u8], offset: usize) -> Result<u8, DecodeError> {
    Ok(need(reply, offset, 1)?[0])
}

pub fn read_i8(reply: &[u8], offset: usize) -> Result<i8, DecodeError> {
    Ok(read_u8(reply, offset)? as i8)
}

pub fn read_u16(reply: &[u8], offset: usize) -> Result<u16, DecodeError> {
    let b = need(reply, offset, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_i16(reply: &[u8], offset: usize) -> Result<i16, DecodeError> {
    let b = need(reply, offset, 2)?;
    Ok(i16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32(reply: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let b = need(reply, offset, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_i32(reply: &[u8], offset: usize) -> Result<i32, DecodeError> {
    let b = need(reply, offset, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// ASCII run from the first data byte to the end of the reply, NUL padding
/// stripped.
pub fn read_text(reply: &[u8]) -> Result<String, DecodeError> {
    let data = reply.get(REPLY_DATA..).ok_or(DecodeError::ShortReply {
        needed: REPLY_DATA,
        actual: reply.len(),
    })?;
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    Ok(data[..end]
        .iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|b| *b as char)
        .collect())
}

/// `len` raw bytes from the first data byte as upper-case hex digits.
pub fn read_hex(reply: &[u8], len: usize) -> Result<String, DecodeError> {
    Ok(need(reply, REPLY_DATA, len)?
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect())
}

/// Render bytes as space-separated hex pairs for trace output.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_checks_offset_three_only() {
        assert!(verify(&[0, 0, 0, 0xA5]));
        assert!(verify(&[0xFF, 0xFF, 0xFF, 0xA5, 1, 2]));
        for status in (0u8..=255).filter(|s| *s != 0xA5) {
            assert!(!verify(&[0, 0, 0, status, 0]));
        }
        assert!(!verify(&[]));
        assert!(!verify(&[0xA5, 0xA5, 0xA5]));
    }

    #[test]
    fn decode_bits_reads_lsb_first_within_bytes() {
        let buf = [0b1010_0110, 0b0000_0001];
        assert_eq!(decode_bits(3, &buf, 0).unwrap(), 0b110);
        assert_eq!(decode_bits(3, &buf, 5).unwrap(), 0b101);
        // Field straddling the byte boundary: bits 7 and 8
        assert_eq!(decode_bits(2, &buf, 7).unwrap(), 0b11);
        // A whole aligned byte reads back as the byte
        assert_eq!(decode_bits(8, &buf, 0).unwrap(), 0b1010_0110);
        assert_eq!(decode_bits(0, &buf, 3).unwrap(), 0);
    }

    #[test]
    fn decode_bits_rejects_short_buffers() {
        assert_eq!(
            decode_bits(4, &[0xFF], 6),
            Err(DecodeError::ShortReply {
                needed: 2,
                actual: 1
            })
        );
        assert_eq!(decode_bits(33, &[0; 8], 0), Err(DecodeError::FieldTooWide(33)));
    }

    #[test]
    fn bit_offsets_near_usize_max_are_errors() {
        assert!(matches!(
            decode_bits(8, &[0; 4], usize::MAX - 2),
            Err(DecodeError::ShortReply { actual: 4, .. })
        ));
        let mut buf = [0u8; 4];
        assert!(encode_bits(8, 0xFF, &mut buf, usize::MAX - 2).is_err());
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn bit_fields_round_trip_at_every_width_and_offset() {
        let original: Vec<u8> = (0..8u8).map(|i| i.wrapping_mul(0x5B) ^ 0xC3).collect();
        for len in 1..=32u32 {
            for start in 0..=(original.len() * 8 - len as usize) {
                let value = decode_bits(len, &original, start).unwrap();
                let mut rebuilt = vec![0u8; original.len()];
                encode_bits(len, value, &mut rebuilt, start).unwrap();
                for bit in start..start + len as usize {
                    let a = (original[bit / 8] >> (bit % 8)) & 1;
                    let b = (rebuilt[bit / 8] >> (bit % 8)) & 1;
                    assert_eq!(a, b, "len {len} start {start} bit {bit}");
                }
            }
        }
    }

    #[test]
    fn fixed_width_reads_are_big_endian() {
        let reply = [0, 0, 0, 0xA5, 0x00, 0x00, 0x01, 0xF4, 0xFF, 0xFE];
        assert_eq!(read_i32(&reply, 4).unwrap(), 500);
        assert_eq!(read_i16(&reply, 8).unwrap(), -2);
        assert_eq!(read_u16(&reply, 6).unwrap(), 0x01F4);
        assert!(matches!(
            read_i32(&reply, 8),
            Err(DecodeError::ShortReply { needed: 12, .. })
        ));
    }

    #[test]
    fn text_stops_at_padding() {
        let mut reply = vec![0, 0, 0, 0xA5];
        reply.extend_from_slice(b"Dexter Industries");
        reply.extend_from_slice(&[0, 0, 0]);
        assert_eq!(read_text(&reply).unwrap(), "Dexter Industries");
        assert!(read_text(&[0, 0]).is_err());
    }

    #[test]
    fn id_renders_as_hex() {
        let mut reply = vec![0, 0, 0, 0xA5];
        reply.extend((0..16u8).map(|i| i * 0x11));
        assert_eq!(
            read_hex(&reply, 16).unwrap(),
            "00112233445566778899AABBCCDDEEFF"
        );
    }
}
