//! Persisted parameter record.
//!
//! One little-endian `u32` per [`ParamId`] in table order, nothing else.
//! There is no version field: the byte length is the schema guard, and a
//! record of any other length is discarded whole.

use super::{ParamError, ParamId};

/// Exact byte length of a valid record.
pub const RECORD_SIZE: usize = ParamId::COUNT * 4;

pub fn encode(values: &[u32; ParamId::COUNT]) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    for (chunk, value) in out.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode a record.  Range checking is left to the caller.
pub fn decode(bytes: &[u8]) -> Result<[u32; ParamId::COUNT], ParamError> {
    if bytes.len() != RECORD_SIZE {
        return Err(ParamError::SizeMismatch);
    }
    let mut values = [0u32; ParamId::COUNT];
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(values)
}
