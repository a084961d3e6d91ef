//! Variable-length integers and the serial-type content-size
//! table.
//!
//! Two entry points exist on purpose: [`varint`] is a `binrw` parser for use
//! inside `#[derive(BinRead)]` structs that read top-down from a `Read +
//! Seek`; [`read_varint`] decodes the same format out of an in-memory slice,
//! which is what the page/record/carver code needs since those operate on
//! byte ranges sliced out of a `Version`, not a stream.

use crate::error::{DissectError, Result};
use binrw::BinResult;

/// A decoded varint: the value and the number of bytes (1..=9) it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt {
    pub value: i64,
    pub width: u8,
}

impl VarInt {
    pub fn new(value: i64) -> Self {
        VarInt { value, width: varint_width(value) }
    }
}

/// Minimum number of bytes needed to re-encode `value` as a varint. Used
/// only by tests constructing synthetic records; the decoder never needs to
/// guess a width since it always counts bytes consumed.
fn varint_width(value: i64) -> u8 {
    let uvalue = value as u64;
    for width in 1u8..=8 {
        let bits = 7 * width as u32;
        if bits >= 64 || uvalue < (1u64 << bits) {
            return width;
        }
    }
    9
}

/// Decodes a varint from `buf` starting at `offset`. Returns the value and
/// the number of bytes consumed (1..=9). Fails with `MalformedRecord` only
/// on EOF within the varint.
pub fn read_varint(buf: &[u8], offset: usize) -> Result<(i64, usize)> {
    let mut value: u64 = 0;
    for i in 0..9usize {
        let byte = *buf
            .get(offset + i)
            .ok_or_else(|| DissectError::malformed_record("varint truncated (EOF within varint)"))?;

        if i == 8 {
            // 9th byte contributes all 8 bits.
            value = (value << 8) | byte as u64;
            return Ok((value as i64, 9));
        }

        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok((value as i64, i + 1));
        }
    }
    unreachable!("loop always returns by i == 8")
}

/// `binrw` entry point, kept for the fixed-layout header structs in
/// `header.rs` that still read top-down from a stream.
#[binrw::parser(reader)]
pub fn varint() -> BinResult<VarInt> {
    use std::io::Read;

    let mut value: u64 = 0;
    for i in 0..9u8 {
        let byte = {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            buf[0]
        };

        if i == 8 {
            value = (value << 8) | byte as u64;
            return Ok(VarInt { value: value as i64, width: 9 });
        }

        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok(VarInt { value: value as i64, width: i + 1 });
        }
    }
    unreachable!("loop always returns by i == 8")
}

/// Content size in bytes for a given serial-type code. Serial
/// types 10 and 11 are reserved and fail with `MalformedRecord`.
pub fn content_size(serial_type: i64) -> Result<usize> {
    Ok(match serial_type {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 4,
        5 => 6,
        6 => 8,
        7 => 8,
        8 => 0, // constant 0
        9 => 0, // constant 1
        10 | 11 => {
            return Err(DissectError::malformed_record(format!(
                "reserved serial type {serial_type}"
            )))
        }
        n if n >= 12 && n % 2 == 0 => ((n - 12) / 2) as usize,
        n if n >= 13 => ((n - 13) / 2) as usize,
        n => {
            return Err(DissectError::malformed_record(format!(
                "negative/invalid serial type {n}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_byte_varint() {
        let (value, width) = read_varint(&[0x05], 0).unwrap();
        assert_eq!(value, 5);
        assert_eq!(width, 1);
    }

    #[test]
    fn two_byte_varint() {
        // 0x81 0x00 => (1 << 7) | 0 == 128
        let (value, width) = read_varint(&[0x81, 0x00], 0).unwrap();
        assert_eq!(value, 128);
        assert_eq!(width, 2);
    }

    #[test]
    fn nine_byte_varint_uses_all_bits_of_last_byte() {
        let buf = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let (value, width) = read_varint(&buf, 0).unwrap();
        assert_eq!(width, 9);
        assert_eq!(value, -1i64);
    }

    #[test]
    fn truncated_varint_is_malformed_record() {
        let buf = [0x81u8]; // continuation bit set, but no following byte
        let err = read_varint(&buf, 0).unwrap_err();
        assert!(matches!(err, DissectError::MalformedRecord(_)));
    }

    #[test]
    fn content_size_table_matches_spec() {
        assert_eq!(content_size(0).unwrap(), 0);
        assert_eq!(content_size(1).unwrap(), 1);
        assert_eq!(content_size(2).unwrap(), 2);
        assert_eq!(content_size(3).unwrap(), 3);
        assert_eq!(content_size(4).unwrap(), 4);
        assert_eq!(content_size(5).unwrap(), 6);
        assert_eq!(content_size(6).unwrap(), 8);
        assert_eq!(content_size(7).unwrap(), 8);
        assert_eq!(content_size(8).unwrap(), 0);
        assert_eq!(content_size(9).unwrap(), 0);
        assert!(content_size(10).is_err());
        assert!(content_size(11).is_err());
        assert_eq!(content_size(12).unwrap(), 0); // blob len 0
        assert_eq!(content_size(13).unwrap(), 0); // text len 0
        assert_eq!(content_size(14).unwrap(), 1); // blob len 1
        assert_eq!(content_size(23).unwrap(), 5); // text len 5
    }

    #[test]
    fn varint_roundtrips_through_width_helper() {
        for v in [0i64, 1, 127, 128, 16383, 16384, i64::MAX, -1, i64::MIN] {
            let vi = VarInt::new(v);
            assert!((1..=9).contains(&vi.width));
        }
    }
}
