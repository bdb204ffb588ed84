//! Big-endian integer extraction from raw packet buffers.
//!
//! Every multi-byte field in the memcached binary protocol is network order.
//! These helpers are pure reads at an offset; callers pre-validate region
//! lengths, and any read past the end of the buffer is an explicit error
//! rather than a panic since the bytes come straight off the wire.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfRange {
        offset: usize,
        width: usize,
        len: usize,
    },
}

fn take<const N: usize>(buffer: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    buffer
        .get(offset..offset + N)
        .and_then(|region| region.try_into().ok())
        .ok_or(DecodeError::OutOfRange {
            offset,
            width: N,
            len: buffer.len(),
        })
}

/// Reads an unsigned 16-bit integer in network order.
pub fn decode_u16(buffer: &[u8], offset: usize) -> Result<u16, DecodeError> {
    take(buffer, offset).map(u16::from_be_bytes)
}

/// Reads a signed 32-bit integer in network order.
pub fn decode_i32(buffer: &[u8], offset: usize) -> Result<i32, DecodeError> {
    take(buffer, offset).map(i32::from_be_bytes)
}

/// Reads an unsigned 64-bit integer in network order.
pub fn decode_u64(buffer: &[u8], offset: usize) -> Result<u64, DecodeError> {
    take(buffer, offset).map(u64::from_be_bytes)
}
