//! Binary codec primitives (C1).
//!
//! The parent-block header, transaction and Merkle-link types mirror the
//! parent chain's wire format exactly, so this module implements real byte-
//! level encoding rather than wrapping `serde_json` in a length prefix.
//! Decoders reject non-canonical encodings: shortest-varint only, no
//! trailing bytes where a schema says there should be none.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated, needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("value overflowed its target type")]
    Overflow,
    #[error("unknown tagged-union variant: {0}")]
    UnknownVariant(u8),
    #[error("non-canonical encoding: {0}")]
    NonCanonical(&'static str),
    #[error("list exceeds maximum allowed length: {0}")]
    ListTooLong(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Maximum elements accepted by `decode_list`, a sanity bound against
/// malicious length prefixes rather than a protocol-significant constant.
pub const MAX_LIST_LEN: usize = 1_000_000;

pub trait Encode {
    fn encode(&self, out: &mut BytesMut);
}

pub trait Decode: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self>;
}

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        Err(CodecError::Truncated { needed: n - buf.len() })
    } else {
        Ok(())
    }
}

/// Bitcoin-style CompactSize: values below 0xfd encode as a single byte;
/// 0xfd/0xfe/0xff escape to an explicit u16/u32/u64. Decoding rejects any
/// encoding that could have used a shorter form (non-canonical).
pub fn encode_varint(value: u64, out: &mut BytesMut) {
    match value {
        0..=0xfc => out.put_u8(value as u8),
        0xfd..=0xffff => {
            out.put_u8(0xfd);
            out.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            out.put_u8(0xfe);
            out.put_u32_le(value as u32);
        }
        _ => {
            out.put_u8(0xff);
            out.put_u64_le(value);
        }
    }
}

pub fn decode_varint(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 1)?;
    let tag = buf[0];
    *buf = &buf[1..];
    match tag {
        0..=0xfc => Ok(tag as u64),
        0xfd => {
            need(buf, 2)?;
            let v = u16::from_le_bytes([buf[0], buf[1]]);
            *buf = &buf[2..];
            if v < 0xfd {
                return Err(CodecError::NonCanonical("u16 varint could fit in one byte"));
            }
            Ok(v as u64)
        }
        0xfe => {
            need(buf, 4)?;
            let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            *buf = &buf[4..];
            if v <= 0xffff {
                return Err(CodecError::NonCanonical("u32 varint could fit in u16"));
            }
            Ok(v as u64)
        }
        0xff => {
            need(buf, 8)?;
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[..8]);
            *buf = &buf[8..];
            let v = u64::from_le_bytes(b);
            if v <= 0xffff_ffff {
                return Err(CodecError::NonCanonical("u64 varint could fit in u32"));
            }
            Ok(v)
        }
    }
}

pub fn encode_bytes(data: &[u8], out: &mut BytesMut) {
    encode_varint(data.len() as u64, out);
    out.put_slice(data);
}

pub fn decode_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = decode_varint(buf)? as usize;
    need(buf, len)?;
    let out = buf[..len].to_vec();
    *buf = &buf[len..];
    Ok(out)
}

pub fn encode_hash(hash: &[u8; 32], out: &mut BytesMut) {
    out.put_slice(hash);
}

pub fn decode_hash(buf: &mut &[u8]) -> Result<[u8; 32]> {
    need(buf, 32)?;
    let mut h = [0u8; 32];
    h.copy_from_slice(&buf[..32]);
    *buf = &buf[32..];
    Ok(h)
}

pub fn encode_list<T: Encode>(items: &[T], out: &mut BytesMut) {
    encode_varint(items.len() as u64, out);
    for item in items {
        item.encode(out);
    }
}

pub fn decode_list<T: Decode>(buf: &mut &[u8]) -> Result<Vec<T>> {
    let len = decode_varint(buf)? as usize;
    if len > MAX_LIST_LEN {
        return Err(CodecError::ListTooLong(len));
    }
    let mut items = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        items.push(T::decode(buf)?);
    }
    Ok(items)
}

impl Encode for u32 {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(*self);
    }
}
impl Decode for u32 {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        need(buf, 4)?;
        let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        *buf = &buf[4..];
        Ok(v)
    }
}

impl Encode for u64 {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(*self);
    }
}
impl Decode for u64 {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        need(buf, 8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[..8]);
        *buf = &buf[8..];
        Ok(u64::from_le_bytes(b))
    }
}

/// Convenience entry points used by callers that just want `Vec<u8>` in and
/// out without threading a `BytesMut` themselves.
pub fn encode_to_vec<T: Encode>(value: &T) -> Vec<u8> {
    let mut out = BytesMut::new();
    value.encode(&mut out);
    out.to_vec()
}

pub fn decode_from_slice<T: Decode>(mut data: &[u8]) -> Result<T> {
    let value = T::decode(&mut data)?;
    if !data.is_empty() {
        return Err(CodecError::NonCanonical("trailing bytes after decode"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips_each_size_class() {
        for v in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut out = BytesMut::new();
            encode_varint(v, &mut out);
            let mut slice = &out[..];
            assert_eq!(decode_varint(&mut slice).unwrap(), v);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn varint_rejects_non_canonical_encoding() {
        // 0xfd followed by a u16 that fits in one byte.
        let bytes = [0xfd, 0x05, 0x00];
        let mut slice = &bytes[..];
        assert_eq!(
            decode_varint(&mut slice),
            Err(CodecError::NonCanonical("u16 varint could fit in one byte"))
        );
    }

    #[test]
    fn decode_bytes_reports_truncation() {
        let bytes = [0x05, 0x01, 0x02];
        let mut slice = &bytes[..];
        assert_eq!(decode_bytes(&mut slice), Err(CodecError::Truncated { needed: 2 }));
    }

    #[test]
    fn list_rejects_absurd_length_prefix() {
        let mut out = BytesMut::new();
        encode_varint((MAX_LIST_LEN as u64) + 1, &mut out);
        let mut slice = &out[..];
        assert!(matches!(decode_list::<u32>(&mut slice), Err(CodecError::ListTooLong(_))));
    }
}
