//! Reads and writes the `.fjm` FlipJump binary image format: a small
//! versioned container holding memory segments, optionally zlib-compressed,
//! with a trailing CRC-32 over the whole file.
//!
//! Layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "FJM\0"
//! 4       2     version (currently 3)
//! 6       4     width w, in bits
//! 10      2     flags (bit 0 = segments are zlib-compressed)
//! 12      4     segment count n
//! 16      8     reserved, zero
//! 24      32*n  segment table: (start_bit, length_bits, data_offset, data_length_bytes), all u64
//! ...     ...   data blob: segment payloads at their listed offsets
//! end-4   4     crc32 over every byte before the trailer
//! ```

use byteorder::{LittleEndian as Endian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

mod codec;
pub use codec::{SegmentCodec, ZlibCodec};

const MAGIC: [u8; 4] = *b"FJM\0";
const CURRENT_VERSION: u16 = 3;
const FLAG_COMPRESSED: u16 = 1;
const HEADER_LEN: usize = 24;
const SEGMENT_ENTRY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("not a FlipJump image (bad magic)")]
    BadMagic,
    #[error("unsupported image version {0}, expected {CURRENT_VERSION}")]
    UnsupportedVersion(u16),
    #[error("image corrupt: {0}")]
    Corrupt(String),
    #[error("CRC mismatch: image data does not match its trailer checksum")]
    CrcMismatch,
    #[error("segment start bit {start_bit} is not a multiple of the width ({width} bits)")]
    Misaligned { start_bit: u64, width: u32 },
    #[error("image was assembled for width {found}, but the configured width is {expected}")]
    WidthMismatch { expected: u32, found: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;

/// One contiguous, initialized region of the image. Bit positions not
/// covered by any segment read as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start_bit: u64,
    pub length_bits: u64,
    /// Raw payload, bits laid out LSB-first within each byte.
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(start_bit: u64, length_bits: u64, data: Vec<u8>) -> Segment {
        Segment {
            start_bit,
            length_bits,
            data,
        }
    }
}

/// A complete `.fjm` image: the address width it was assembled for, plus
/// its list of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub segments: Vec<Segment>,
}

impl Image {
    pub fn new(width: u32, segments: Vec<Segment>) -> Image {
        Image { width, segments }
    }

    /// Checks this image was assembled for `expected`'s width before a
    /// caller starts running it against a VM configured for that width.
    pub fn expect_width(&self, expected: u32) -> Result<()> {
        if self.width != expected {
            return Err(ImageError::WidthMismatch {
                expected,
                found: self.width,
            });
        }
        Ok(())
    }
}

/// Writes `image` to `writer`. `codec` is applied to every segment's
/// payload when `compress` is true; pass `None` to leave segments raw.
pub fn write<W: Write>(
    writer: &mut W,
    image: &Image,
    codec: Option<&dyn SegmentCodec>,
) -> Result<()> {
    for segment in &image.segments {
        if segment.start_bit % u64::from(image.width) != 0 {
            return Err(ImageError::Misaligned {
                start_bit: segment.start_bit,
                width: image.width,
            });
        }
    }

    let compressed = codec.is_some();
    let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(image.segments.len());
    for segment in &image.segments {
        match codec {
            Some(codec) => payloads.push(codec.compress(&segment.data)),
            None => payloads.push(segment.data.clone()),
        }
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + image.segments.len() * SEGMENT_ENTRY_LEN);
    buf.write_all(&MAGIC)?;
    buf.write_u16::<Endian>(CURRENT_VERSION)?;
    buf.write_u32::<Endian>(image.width)?;
    buf.write_u16::<Endian>(if compressed { FLAG_COMPRESSED } else { 0 })?;
    buf.write_u32::<Endian>(image.segments.len() as u32)?;
    buf.write_all(&[0u8; 8])?;

    let mut offset: u64 = 0;
    for (segment, payload) in image.segments.iter().zip(&payloads) {
        buf.write_u64::<Endian>(segment.start_bit)?;
        buf.write_u64::<Endian>(segment.length_bits)?;
        buf.write_u64::<Endian>(offset)?;
        buf.write_u64::<Endian>(payload.len() as u64)?;
        offset += payload.len() as u64;
    }

    for payload in &payloads {
        buf.write_all(payload)?;
    }

    let crc = crc32fast::hash(&buf);
    buf.write_u32::<Endian>(crc)?;

    writer.write_all(&buf)?;
    log::debug!(
        "wrote .fjm image: width={} segments={} compressed={}",
        image.width,
        image.segments.len(),
        compressed
    );
    Ok(())
}

/// Reads and validates a `.fjm` image from `reader`, decompressing segments
/// if the compressed flag is set.
pub fn read<R: Read>(reader: &mut R, codec: &dyn SegmentCodec) -> Result<Image> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;

    if buf.len() < HEADER_LEN + 4 {
        return Err(ImageError::Corrupt("file too short".into()));
    }

    let (body, trailer) = buf.split_at(buf.len() - 4);
    let expected_crc = (&trailer[..]).read_u32::<Endian>()?;
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err(ImageError::CrcMismatch);
    }

    let mut head = body;
    let mut magic = [0u8; 4];
    head.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(ImageError::BadMagic);
    }

    let version = head.read_u16::<Endian>()?;
    if version != CURRENT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    let width = head.read_u32::<Endian>()?;
    let flags = head.read_u16::<Endian>()?;
    let n_segments = head.read_u32::<Endian>()?;
    let mut reserved = [0u8; 8];
    head.read_exact(&mut reserved)?;

    let compressed = flags & FLAG_COMPRESSED != 0;

    let table_len = n_segments as usize * SEGMENT_ENTRY_LEN;
    if head.len() < table_len {
        return Err(ImageError::Corrupt("segment table truncated".into()));
    }
    let (mut table, data_blob) = head.split_at(table_len);

    let mut segments = Vec::with_capacity(n_segments as usize);
    for _ in 0..n_segments {
        let start_bit = table.read_u64::<Endian>()?;
        let length_bits = table.read_u64::<Endian>()?;
        let data_offset = table.read_u64::<Endian>()?;
        let data_length = table.read_u64::<Endian>()?;

        let start = data_offset as usize;
        let end = start
            .checked_add(data_length as usize)
            .ok_or_else(|| ImageError::Corrupt("segment data range overflows".into()))?;
        if end > data_blob.len() {
            return Err(ImageError::Corrupt("segment data range out of bounds".into()));
        }
        let raw = &data_blob[start..end];
        let data = if compressed {
            codec.decompress(raw)?
        } else {
            raw.to_vec()
        };

        segments.push(Segment::new(start_bit, length_bits, data));
    }

    Ok(Image::new(width, segments))
}

pub trait ReadImageExt: Read + Sized {
    fn read_image(&mut self, codec: &dyn SegmentCodec) -> Result<Image> {
        read(self, codec)
    }
}

impl<R: Read + Sized> ReadImageExt for R {}

pub trait WriteImageExt: Write + Sized {
    fn write_image(&mut self, image: &Image, codec: Option<&dyn SegmentCodec>) -> Result<()> {
        write(self, image, codec)
    }
}

impl<W: Write + Sized> WriteImageExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P, codec: &dyn SegmentCodec) -> Result<Image> {
    BufReader::new(File::open(path)?).read_image(codec)
}

pub fn write_file<P: AsRef<Path>>(
    path: P,
    image: &Image,
    codec: Option<&dyn SegmentCodec>,
) -> Result<()> {
    BufWriter::new(File::create(path)?).write_image(image, codec)
}

#[cfg(test)]
mod test;
