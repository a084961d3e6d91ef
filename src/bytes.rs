//! Big-endian integer primitives and content hashing over in-memory byte
//! ranges.
//!
//! `binrw` covers the fixed, top-down structures in `header.rs`; these free
//! functions cover the rest of the engine, which reads at byte offsets
//! computed at run time (cell bodies, overflow pages, carved candidates),
//! using plain `byteorder` calls instead of a derive macro.

use byteorder::{BigEndian, ByteOrder};
use md5::{Digest, Md5};

use crate::error::{DissectError, Result};

fn slice<'a>(buf: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8]> {
    buf.get(offset..offset + len)
        .ok_or_else(|| DissectError::end_of_file(offset as u64, buf.len() as u64))
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(slice(buf, offset, 1)?[0])
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16> {
    Ok(BigEndian::read_u16(slice(buf, offset, 2)?))
}

pub fn read_u24_be(buf: &[u8], offset: usize) -> Result<u32> {
    let s = slice(buf, offset, 3)?;
    Ok(u32::from_be_bytes([0, s[0], s[1], s[2]]))
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Result<u32> {
    Ok(BigEndian::read_u32(slice(buf, offset, 4)?))
}

pub fn read_i48_be(buf: &[u8], offset: usize) -> Result<i64> {
    let s = slice(buf, offset, 6)?;
    let mut bytes = [0u8; 8];
    bytes[2..8].copy_from_slice(s);
    let unsigned = u64::from_be_bytes(bytes);
    // Shift the 48-bit value into the top of a u64, then arithmetic-shift
    // back down to sign-extend from bit 47.
    let shifted = (unsigned << 16) as i64;
    Ok(shifted >> 16)
}

pub fn read_i64_be(buf: &[u8], offset: usize) -> Result<i64> {
    Ok(BigEndian::read_i64(slice(buf, offset, 8)?))
}

pub fn read_f64_be(buf: &[u8], offset: usize) -> Result<f64> {
    Ok(BigEndian::read_f64(slice(buf, offset, 8)?))
}

/// MD5 digest of a byte range, used to identify cells and header regions
/// across versions.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
