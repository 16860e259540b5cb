//! Chunk compression and decompression.
//!
//! Every record payload is split into chunks of at most 16,000 raw bytes.
//! Each chunk is self-contained:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 4    | Sub-header size (16) |
//! | 0x04   | 4    | Reserved (0) |
//! | 0x08   | 4    | Compressed size, or 32000 for a stored chunk |
//! | 0x0C   | 4    | Uncompressed size |
//! | 0x10   | n    | Raw DEFLATE stream, or the raw bytes |
//!
//! The chunk is zero-padded to a multiple of 128 bytes.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::{FormatError, FormatResult};

/// Largest raw input a single chunk may carry.
pub const MAX_CHUNK_SIZE: usize = 16_000;

/// Compressed-size value marking a stored (uncompressed) chunk.
pub const UNCOMPRESSED_SENTINEL: u32 = 32_000;

/// Size of the chunk sub-header.
pub const CHUNK_HEADER_SIZE: usize = 16;

/// Chunks are padded to this boundary.
pub const CHUNK_ALIGNMENT: usize = 128;

/// Upper bound on a decoded chunk; chunk tables store raw lengths as `u16`.
const MAX_DECODED_CHUNK: usize = u16::MAX as usize;

/// 16-byte chunk sub-header
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ChunkHeader {
    /// Sub-header size, always 16 when written by this crate
    pub header_size: u32,
    /// Reserved, always 0 when written by this crate
    pub reserved: u32,
    /// Length of the DEFLATE stream, or [`UNCOMPRESSED_SENTINEL`]
    pub compressed_size: u32,
    /// Length of the decoded bytes
    pub uncompressed_size: u32,
}

impl ChunkHeader {
    fn new(compressed_size: u32, uncompressed_size: u32) -> Self {
        Self {
            header_size: CHUNK_HEADER_SIZE as u32,
            reserved: 0,
            compressed_size,
            uncompressed_size,
        }
    }

    /// Whether the payload is stored without compression.
    pub const fn is_stored(&self) -> bool {
        self.compressed_size == UNCOMPRESSED_SENTINEL
    }

    /// Number of payload bytes following the sub-header.
    pub const fn payload_len(&self) -> usize {
        if self.is_stored() {
            self.uncompressed_size as usize
        } else {
            self.compressed_size as usize
        }
    }

    /// Serialize to 16 bytes.
    pub fn to_bytes(&self) -> FormatResult<[u8; CHUNK_HEADER_SIZE]> {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        self.write_le(&mut Cursor::new(&mut buf[..]))?;
        Ok(buf)
    }
}

/// Round `len` up to the next multiple of `alignment`.
pub const fn align_up(len: usize, alignment: usize) -> usize {
    len.div_ceil(alignment) * alignment
}

/// Padded on-disk length of a chunk with `payload_len` payload bytes.
pub const fn padded_chunk_len(payload_len: usize) -> usize {
    align_up(CHUNK_HEADER_SIZE + payload_len, CHUNK_ALIGNMENT)
}

/// Compress up to 16,000 bytes into one self-contained, padded chunk.
///
/// Falls back to storing the bytes when DEFLATE does not shrink them.
pub fn compress_chunk(data: &[u8]) -> FormatResult<Vec<u8>> {
    if data.len() > MAX_CHUNK_SIZE {
        return Err(FormatError::InvalidChunkSize {
            size: data.len(),
            min: 0,
            max: MAX_CHUNK_SIZE,
        });
    }

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| FormatError::Compression(format!("DEFLATE compression failed: {e}")))?;
    let deflated = encoder
        .finish()
        .map_err(|e| FormatError::Compression(format!("DEFLATE compression failed: {e}")))?;

    let (header, payload) = if deflated.len() < data.len() {
        (
            ChunkHeader::new(deflated.len() as u32, data.len() as u32),
            deflated.as_slice(),
        )
    } else {
        (
            ChunkHeader::new(UNCOMPRESSED_SENTINEL, data.len() as u32),
            data,
        )
    };

    let mut chunk = Vec::with_capacity(padded_chunk_len(payload.len()));
    chunk.extend_from_slice(&header.to_bytes()?);
    chunk.extend_from_slice(payload);
    chunk.resize(padded_chunk_len(payload.len()), 0);
    Ok(chunk)
}

/// Split `data` into slices of at most `max_chunk` bytes and compress each.
///
/// Empty input yields no chunks.
pub fn compress_stream(data: &[u8], max_chunk: usize) -> FormatResult<Vec<Vec<u8>>> {
    if max_chunk == 0 || max_chunk > MAX_CHUNK_SIZE {
        return Err(FormatError::InvalidChunkSize {
            size: max_chunk,
            min: 1,
            max: MAX_CHUNK_SIZE,
        });
    }

    data.chunks(max_chunk).map(compress_chunk).collect()
}

/// Decode the chunk starting at `offset`.
///
/// Validates the decoded length and the DEFLATE stream length against the
/// sub-header and checks that the padding up to the next 128-byte boundary
/// is zero. On success the reader
/// is positioned just past the padding.
pub fn decompress_chunk<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let header = ChunkHeader::read_le(reader)?;

    let expected = header.uncompressed_size as usize;
    let payload_len = header.payload_len();
    if expected > MAX_DECODED_CHUNK || payload_len > MAX_DECODED_CHUNK {
        return Err(FormatError::InvalidHeader(format!(
            "chunk at {offset} declares {payload_len} stored / {expected} decoded bytes"
        )));
    }

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let (data, consumed) = if header.is_stored() {
        (payload, payload_len)
    } else {
        let mut decoder = DeflateDecoder::new(payload.as_slice());
        let mut decoded = Vec::with_capacity(expected);
        (&mut decoder)
            .take(expected as u64 + 1)
            .read_to_end(&mut decoded)
            .map_err(|e| {
                FormatError::Compression(format!("DEFLATE decompression at {offset} failed: {e}"))
            })?;
        (decoded, decoder.total_in() as usize)
    };

    if data.len() != expected {
        return Err(FormatError::ChunkSizeMismatch {
            offset,
            expected,
            actual: data.len(),
        });
    }
    // The stream must end exactly where the declared payload does
    if consumed != payload_len {
        return Err(FormatError::ChunkSizeMismatch {
            offset,
            expected: payload_len,
            actual: consumed,
        });
    }

    let used = CHUNK_HEADER_SIZE + payload_len;
    let mut padding = vec![0u8; padded_chunk_len(payload_len) - used];
    reader.read_exact(&mut padding)?;
    if let Some(index) = padding.iter().position(|&b| b != 0) {
        return Err(FormatError::CorruptPadding {
            offset: offset + (used + index) as u64,
        });
    }

    Ok(data)
}

/// Decode `count` consecutive chunks starting at `offset` and concatenate them.
pub fn decompress_chunks<R: Read + Seek>(
    reader: &mut R,
    count: usize,
    offset: u64,
) -> FormatResult<Vec<u8>> {
    let mut data = Vec::with_capacity(count * MAX_CHUNK_SIZE);
    let mut position = offset;
    for _ in 0..count {
        data.extend_from_slice(&decompress_chunk(reader, position)?);
        position = reader.stream_position()?;
    }
    Ok(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_compressible_chunk() {
        let data = vec![0x41u8; 4096];
        let chunk = compress_chunk(&data).expect("compress");

        let header = ChunkHeader::read_le(&mut Cursor::new(&chunk)).expect("header");
        assert!(!header.is_stored());
        assert_eq!(header.header_size, 16);
        assert_eq!(header.reserved, 0);
        assert_eq!(header.uncompressed_size, 4096);
        assert_eq!(chunk.len() % CHUNK_ALIGNMENT, 0);
        assert!(chunk.len() < data.len());

        let decoded = decompress_chunk(&mut Cursor::new(&chunk), 0).expect("decompress");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_incompressible_chunk_is_stored() {
        let data = noise(1000);
        let chunk = compress_chunk(&data).expect("compress");

        let header = ChunkHeader::read_le(&mut Cursor::new(&chunk)).expect("header");
        assert!(header.is_stored());
        assert_eq!(header.compressed_size, UNCOMPRESSED_SENTINEL);
        assert_eq!(header.uncompressed_size, 1000);
        assert_eq!(&chunk[16..1016], data.as_slice());
        assert_eq!(chunk.len(), padded_chunk_len(1000));

        let decoded = decompress_chunk(&mut Cursor::new(&chunk), 0).expect("decompress");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = compress_chunk(&[]).expect("compress");
        assert_eq!(chunk.len(), CHUNK_ALIGNMENT);
        let decoded = decompress_chunk(&mut Cursor::new(&chunk), 0).expect("decompress");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let result = compress_chunk(&vec![0u8; MAX_CHUNK_SIZE + 1]);
        assert!(matches!(result, Err(FormatError::InvalidChunkSize { .. })));
    }

    #[test]
    fn test_stream_splits_at_limit() {
        let data = patterned(MAX_CHUNK_SIZE * 2 + 1);
        let chunks = compress_stream(&data, MAX_CHUNK_SIZE).expect("compress");
        assert_eq!(chunks.len(), 3);

        let joined: Vec<u8> = chunks.concat();
        let decoded =
            decompress_chunks(&mut Cursor::new(&joined), chunks.len(), 0).expect("decompress");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_stream_custom_chunk_size() {
        let data = patterned(1000);
        let chunks = compress_stream(&data, 300).expect("compress");
        assert_eq!(chunks.len(), 4);
        assert!(compress_stream(&data, 0).is_err());
        assert!(compress_stream(&data, MAX_CHUNK_SIZE + 1).is_err());
    }

    #[test]
    fn test_decompress_at_offset() {
        let mut buf = vec![0u8; 256];
        let chunk = compress_chunk(b"offset chunk payload").expect("compress");
        buf.extend_from_slice(&chunk);

        let mut cursor = Cursor::new(&buf);
        let decoded = decompress_chunk(&mut cursor, 256).expect("decompress");
        assert_eq!(decoded, b"offset chunk payload");
        assert_eq!(cursor.position(), 256 + chunk.len() as u64);
    }

    #[test]
    fn test_corrupt_padding_detected() {
        let mut chunk = compress_chunk(b"short").expect("compress");
        let last = chunk.len() - 1;
        chunk[last] = 0x7F;

        let result = decompress_chunk(&mut Cursor::new(&chunk), 0);
        match result {
            Err(FormatError::CorruptPadding { offset }) => assert_eq!(offset, last as u64),
            other => panic!("expected CorruptPadding, got {other:?}"),
        }
    }

    #[test]
    fn test_size_mismatch_detected() {
        let mut chunk = compress_chunk(&vec![7u8; 512]).expect("compress");
        chunk[0x0C..0x10].copy_from_slice(&100u32.to_le_bytes());

        let result = decompress_chunk(&mut Cursor::new(&chunk), 0);
        assert!(matches!(
            result,
            Err(FormatError::ChunkSizeMismatch { expected: 100, .. })
        ));
    }

    #[test]
    fn test_header_bytes() {
        let header = ChunkHeader::new(0x1234, 16_000);
        let bytes = header.to_bytes().expect("serialize");
        assert_eq!(
            bytes,
            [16, 0, 0, 0, 0, 0, 0, 0, 0x34, 0x12, 0, 0, 0x80, 0x3E, 0, 0]
        );
        let parsed = ChunkHeader::read_le(&mut Cursor::new(&bytes)).expect("parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_oversized_compressed_size_detected() {
        let data = vec![0x42u8; 2000];
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).expect("deflate");
        let deflated = encoder.finish().expect("deflate");

        // Three stray bytes after the stream, counted in the sub-header
        let declared = deflated.len() + 3;
        let mut chunk = ChunkHeader::new(declared as u32, data.len() as u32)
            .to_bytes()
            .expect("serialize")
            .to_vec();
        chunk.extend_from_slice(&deflated);
        chunk.extend_from_slice(&[0xAA; 3]);
        chunk.resize(padded_chunk_len(declared), 0);

        let result = decompress_chunk(&mut Cursor::new(&chunk), 0);
        match result {
            Err(FormatError::ChunkSizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, declared);
                assert_eq!(actual, deflated.len());
            }
            other => panic!("expected ChunkSizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_chunk_is_io_error() {
        let chunk = compress_chunk(&noise(600)).expect("compress");
        let result = decompress_chunk(&mut Cursor::new(&chunk[..200]), 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_padded_chunk_len() {
        assert_eq!(padded_chunk_len(0), 128);
        assert_eq!(padded_chunk_len(112), 128);
        assert_eq!(padded_chunk_len(113), 256);
        assert_eq!(padded_chunk_len(MAX_CHUNK_SIZE), 16_128);
    }
}
