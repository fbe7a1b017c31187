//! Little-endian word codec and chunk padding.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Buffer length {len} is not a multiple of 4")]
    UnalignedLength { len: usize },
}

/// Serialize words as consecutive little-endian u32s.
pub fn pack(words: &[u32]) -> Vec<u8> {
    let mut buf = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut buf);
    buf
}

/// Read a buffer back as little-endian u32 words.
pub fn unpack(data: &[u8]) -> Result<Vec<u32>, CodecError> {
    if data.len() % 4 != 0 {
        return Err(CodecError::UnalignedLength { len: data.len() });
    }
    let mut words = vec![0u32; data.len() / 4];
    LittleEndian::read_u32_into(data, &mut words);
    Ok(words)
}

/// Zero-extend `data` to the next multiple of `chunk_size`.
///
/// A `chunk_size` of zero returns the data unchanged.
pub fn pad(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    if chunk_size == 0 {
        return out;
    }
    let rem = data.len() % chunk_size;
    if rem != 0 {
        out.resize(data.len() + (chunk_size - rem), 0);
    }
    out
}
