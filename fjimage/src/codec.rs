//! Segment (de)compression as a pluggable codec, so the image format isn't
//! wedded to one compression algorithm.

use crate::{ImageError, Result};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

pub trait SegmentCodec {
    fn compress(&self, raw: &[u8]) -> Vec<u8>;
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}

/// The codec named by the format's single defined compression flag: zlib
/// deflate via `flate2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZlibCodec;

impl SegmentCodec for ZlibCodec {
    fn compress(&self, raw: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(raw, Compression::default());
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .expect("in-memory zlib encode cannot fail");
        out
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| ImageError::Corrupt(format!("zlib decompress failed: {err}")))?;
        Ok(out)
    }
}
