//! Codec descriptors for variable encoding (`compressor` / `filters`) and the
//! byte-level compressors that realise them in the mini Zarr store.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub mod store;
pub mod zstdc;

/// A codec descriptor as it appears in `VariableEncoding::compressor` /
/// `VariableEncoding::filters`, and as persisted in `.zarray` metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum CodecDescriptor {
    /// No-op codec: chunk bytes are stored verbatim.
    Store,
    /// Zstandard compression at the given level (1..=22).
    Zstd { level: i32 },
}

impl CodecDescriptor {
    pub fn compressor(&self) -> &'static dyn Compressor {
        match self {
            CodecDescriptor::Store => &store::Store,
            CodecDescriptor::Zstd { .. } => &zstdc::ZstdCompressor,
        }
    }

    pub fn level(&self) -> i32 {
        match self {
            CodecDescriptor::Store => 0,
            CodecDescriptor::Zstd { level } => *level,
        }
    }
}

impl Default for CodecDescriptor {
    fn default() -> Self {
        CodecDescriptor::Zstd { level: 3 }
    }
}

/// A single codec's byte-stream compress/decompress pair.
///
/// `filters` apply in order on compress and in reverse order on decompress;
/// `compressor` (at most one) applies after all filters.
pub trait Compressor: Send + Sync {
    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, level: i32) -> Result<u64>;
    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64>;
}

/// Compress `data` through `filters` (in order) then `compressor` (if any).
pub fn encode_chunk(
    data: &[u8],
    filters: &[CodecDescriptor],
    compressor: Option<&CodecDescriptor>,
) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    for f in filters {
        let mut out = Vec::with_capacity(buf.len());
        f.compressor().compress(&mut &buf[..], &mut out, f.level())?;
        buf = out;
    }
    if let Some(c) = compressor {
        let mut out = Vec::with_capacity(buf.len());
        c.compressor().compress(&mut &buf[..], &mut out, c.level())?;
        buf = out;
    }
    Ok(buf)
}

/// Reverse of [`encode_chunk`].
pub fn decode_chunk(
    data: &[u8],
    filters: &[CodecDescriptor],
    compressor: Option<&CodecDescriptor>,
) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    if let Some(c) = compressor {
        let mut out = Vec::new();
        c.compressor().decompress(&mut &buf[..], &mut out)?;
        buf = out;
    }
    for f in filters.iter().rev() {
        let mut out = Vec::new();
        f.compressor().decompress(&mut &buf[..], &mut out)?;
        buf = out;
    }
    Ok(buf)
}
