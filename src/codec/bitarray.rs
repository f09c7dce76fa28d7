//! Packed enabled mask trailing order frames
//!
//! One bit per field, in schema order, MSB-first within each byte. The mask
//! length is the field count rounded up to a byte boundary; padding bits are
//! written as zero and ignored on decode.

use super::ByteReader;
use crate::error::Result;

/// Append the packed mask for `flags` to `out`
pub(crate) fn encode_mask(flags: &[bool], out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + flags.len().div_ceil(8), 0);
    for (i, enabled) in flags.iter().enumerate() {
        if *enabled {
            out[start + i / 8] |= 0x80 >> (i % 8);
        }
    }
}

/// Consume the packed mask for `count` fields from the reader
pub(crate) fn decode_mask(count: usize, reader: &mut ByteReader<'_>) -> Result<Vec<bool>> {
    let bytes = reader.take(count.div_ceil(8))?;
    Ok((0..count)
        .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
        .collect())
}
