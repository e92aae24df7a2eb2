//! Variable-length integer codec.
//!
//! The disassembler client packs integers in three width classes, named here
//! after its own serialization routines: `dw` (16-bit), `dd` (32-bit) and
//! `dq` (64-bit). The high bits of the first byte select the total width;
//! the remaining bits of that byte plus the following bytes carry the value
//! big-endian. A `dq` is simply two `dd`s, low half first.
//!
//! Decoding is table-driven: the width table is indexed by the first byte's
//! high bits, so every branch of the format is a data row rather than a
//! nested conditional. Encoders always emit the shortest form.
//!
//! Addresses on the wire are shifted by one (`BADADDR`-style sentinels make
//! logical -1 common), so [`encode_ea`]/[`decode_ea`] wrap the `dq` codec
//! with a +1/-1 adapter. The shift is applied around the varint, never
//! folded into it.

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, RangeError, Result};

/// Width table rows: (extra bytes to read, mask for the first byte).
type WidthRow = (usize, u8);

/// 16-bit widths, indexed by `first_byte >> 6`.
const DW_WIDTHS: [WidthRow; 4] = [
    (0, 0xFF), // 0b00...... one byte
    (0, 0xFF), // 0b01...... one byte
    (1, 0x7F), // 0b10...... two bytes
    (2, 0x00), // 0b11...... three bytes, first byte discarded
];

/// 32-bit widths, indexed by `first_byte >> 5`.
const DD_WIDTHS: [WidthRow; 8] = [
    (0, 0xFF), // 0b000.....
    (0, 0xFF), // 0b001.....
    (0, 0xFF), // 0b010.....
    (0, 0xFF), // 0b011.....
    (1, 0x7F), // 0b100..... two bytes
    (1, 0x7F), // 0b101..... two bytes
    (3, 0x3F), // 0b110..... four bytes
    (4, 0x00), // 0b111..... five bytes, first byte discarded
];

fn need(src: &impl Buf, expected: usize, what: &'static str) -> Result<()> {
    if src.remaining() < expected {
        return Err(ProtocolError::ShortRead { what, expected, actual: src.remaining() });
    }
    Ok(())
}

/// Encode a 16-bit value in its shortest packed form.
pub fn encode_dw(dst: &mut impl BufMut, value: u16) {
    if value > 0x3FFF {
        dst.put_u8(0xFF);
        dst.put_u16(value);
    } else if value > 0x7F {
        dst.put_u16(value | 0x8000);
    } else {
        dst.put_u8(value as u8);
    }
}

/// Decode a packed 16-bit value.
pub fn decode_dw(src: &mut impl Buf) -> Result<u16> {
    need(src, 1, "packed dw lead byte")?;
    let lead = src.get_u8();
    let (extra, mask) = DW_WIDTHS[usize::from(lead >> 6)];

    need(src, extra, "packed dw tail")?;
    let mut value = u16::from(lead & mask);
    for _ in 0..extra {
        value = (value << 8) | u16::from(src.get_u8());
    }
    Ok(value)
}

/// Encode a 32-bit value in its shortest packed form.
///
/// The two-byte form masks the lead byte with `0x7F`, not `0x3F`: the second
/// prefix bit doubles as a value bit for the 16-bit class boundary.
pub fn encode_dd(dst: &mut impl BufMut, value: u32) {
    if value > 0x1FFF_FFFF {
        dst.put_u8(0xFF);
        dst.put_u32(value);
    } else if value > 0x3FFF {
        dst.put_u32(value | 0xC000_0000);
    } else if value > 0x7F {
        dst.put_u16(value as u16 | 0x8000);
    } else {
        dst.put_u8(value as u8);
    }
}

/// Decode a packed 32-bit value.
pub fn decode_dd(src: &mut impl Buf) -> Result<u32> {
    need(src, 1, "packed dd lead byte")?;
    let lead = src.get_u8();
    let (extra, mask) = DD_WIDTHS[usize::from(lead >> 5)];

    need(src, extra, "packed dd tail")?;
    let mut value = u32::from(lead & mask);
    for _ in 0..extra {
        value = (value << 8) | u32::from(src.get_u8());
    }
    Ok(value)
}

/// Encode a 64-bit value as two packed 32-bit halves, low half first.
pub fn encode_dq(dst: &mut impl BufMut, value: u64) {
    encode_dd(dst, value as u32);
    encode_dd(dst, (value >> 32) as u32);
}

/// Decode a packed 64-bit value.
pub fn decode_dq(src: &mut impl Buf) -> Result<u64> {
    let low = u64::from(decode_dd(src)?);
    let high = u64::from(decode_dd(src)?);
    Ok((high << 32) | low)
}

/// Encode an effective address. The wire carries `ea + 1` so that the
/// logical -1 sentinel packs into a single zero byte.
pub fn encode_ea(dst: &mut impl BufMut, ea: i64) {
    encode_dq(dst, (ea as u64).wrapping_add(1));
}

/// Decode an effective address, undoing the +1 wire shift.
pub fn decode_ea(src: &mut impl Buf) -> Result<i64> {
    Ok(decode_dq(src)?.wrapping_sub(1) as i64)
}

/// Encode a host-side length as a packed dd.
///
/// Lengths on the wire (strings, buffers, list counts) are all VarInt32;
/// this is the one place the encode side can genuinely run out of range.
pub fn encode_len(dst: &mut impl BufMut, len: usize) -> std::result::Result<(), RangeError> {
    let value = u32::try_from(len).map_err(|_| RangeError::LengthOverflow(len))?;
    encode_dd(dst, value);
    Ok(())
}
