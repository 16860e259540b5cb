//! Generic blob records (type 2).
//!
//! Layout after the preamble:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x14   | 4    | Chunk count |
//! | 0x18   | 8×n  | `{u32 offset, u16 stored length, u16 raw length}` per chunk |
//!
//! Chunk offsets are relative to the end of the (padded) header.

use std::io::{Read, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};

use super::{
    ChunkGroup, EncodedRecord, HEADER_ALIGNMENT, PREAMBLE_SIZE, RecordFormat, RecordPreamble,
    RecordType, build_preamble, to_u16, to_u32, write_padded_header,
};
use crate::chunk::{MAX_CHUNK_SIZE, align_up, decompress_chunk};
use crate::error::{FormatError, FormatResult};

/// Per-chunk entry of a generic record header
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct GenericChunkEntry {
    /// Chunk offset relative to the end of the header
    pub offset: u32,
    /// Padded stored length of the chunk
    pub chunk_len: u16,
    /// Decoded length of the chunk
    pub raw_len: u16,
}

/// Header of a generic record
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct GenericHeader {
    /// Shared preamble
    pub preamble: RecordPreamble,
    /// Number of chunks
    pub chunk_count: u32,
    /// Chunk table
    #[br(count = chunk_count)]
    pub chunks: Vec<GenericChunkEntry>,
}

impl GenericHeader {
    /// Unpadded header size for `chunk_count` chunks.
    pub const fn table_len(chunk_count: usize) -> usize {
        PREAMBLE_SIZE + 4 + chunk_count * 8
    }

    /// Read and validate the header at `offset`.
    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let header = Self::read_le(reader)?;
        header
            .preamble
            .validate(RecordType::Generic, Self::table_len(header.chunks.len()))?;
        Ok(header)
    }

    /// Header plus every stored chunk.
    pub fn footprint(&self) -> u64 {
        u64::from(self.preamble.header_length)
            + self
                .chunks
                .iter()
                .map(|entry| u64::from(entry.chunk_len))
                .sum::<u64>()
    }
}

/// A single contiguous payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericRecord {
    /// Decoded payload
    pub data: Vec<u8>,
}

impl GenericRecord {
    /// Wrap a payload.
    pub const fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Unwrap the payload.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl RecordFormat for GenericRecord {
    const RECORD_TYPE: RecordType = RecordType::Generic;

    fn encode(&self) -> FormatResult<EncodedRecord> {
        let group = ChunkGroup::compress(&self.data)?;

        let mut chunks = Vec::with_capacity(group.chunks.len());
        let mut position = 0usize;
        let raw_lengths = self.data.chunks(MAX_CHUNK_SIZE).map(<[u8]>::len);
        for (chunk_len, raw_len) in group.chunk_lengths().zip(raw_lengths) {
            chunks.push(GenericChunkEntry {
                offset: to_u32(position, "chunk offset")?,
                chunk_len: to_u16(chunk_len, "chunk length")?,
                raw_len: to_u16(raw_len, "chunk raw length")?,
            });
            position += chunk_len;
        }

        let header_length = align_up(GenericHeader::table_len(chunks.len()), HEADER_ALIGNMENT);
        let body = group.chunks.clone();
        let header = GenericHeader {
            preamble: build_preamble(
                Self::RECORD_TYPE,
                header_length,
                self.data.len(),
                &body,
                std::slice::from_ref(&group),
            )?,
            chunk_count: to_u32(chunks.len(), "chunk count")?,
            chunks,
        };

        Ok(EncodedRecord {
            header: write_padded_header(&header)?,
            body,
        })
    }

    fn decode<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        let header = GenericHeader::read_at(reader, offset)?;
        let data_start = offset + u64::from(header.preamble.header_length);

        let mut data = Vec::with_capacity(header.preamble.raw_size as usize);
        for entry in &header.chunks {
            let chunk = decompress_chunk(reader, data_start + u64::from(entry.offset))?;
            if chunk.len() != usize::from(entry.raw_len) {
                return Err(FormatError::InvalidHeader(format!(
                    "chunk table declares {} bytes, chunk decoded to {}",
                    entry.raw_len,
                    chunk.len()
                )));
            }
            data.extend_from_slice(&chunk);
        }

        if data.len() != header.preamble.raw_size as usize {
            return Err(FormatError::InvalidHeader(format!(
                "record declares {} bytes, decoded {}",
                header.preamble.raw_size,
                data.len()
            )));
        }

        Ok(Self { data })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let record = GenericRecord::new(vec![0x10; MAX_CHUNK_SIZE + 10]);
        let encoded = record.encode().expect("encode");

        assert_eq!(encoded.header.len(), 128);
        let header = GenericHeader::read_le(&mut Cursor::new(&encoded.header)).expect("parse");
        assert_eq!(header.preamble.header_length, 128);
        assert_eq!(header.preamble.record_type, 2);
        assert_eq!(header.preamble.raw_size, (MAX_CHUNK_SIZE + 10) as u32);
        assert_eq!(header.chunk_count, 2);
        assert_eq!(header.chunks[0].offset, 0);
        assert_eq!(header.chunks[0].raw_len, MAX_CHUNK_SIZE as u16);
        assert_eq!(
            header.chunks[1].offset,
            u32::from(header.chunks[0].chunk_len)
        );
        assert_eq!(header.chunks[1].raw_len, 10);
    }

    #[test]
    fn test_round_trip() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let record = GenericRecord::new(data);
        let bytes = record.to_bytes().expect("encode");

        let decoded = GenericRecord::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_empty_payload_has_no_chunks() {
        let encoded = GenericRecord::default().encode().expect("encode");
        assert!(encoded.body.is_empty());
        assert_eq!(encoded.len(), 128);

        let decoded = GenericRecord::from_bytes(&encoded.to_bytes()).expect("decode");
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_large_chunk_table_spills_header() {
        // 13 entries fit in 128 bytes
        let record = GenericRecord::new(vec![0; MAX_CHUNK_SIZE * 14 + 1]);
        let encoded = record.encode().expect("encode");
        assert_eq!(encoded.header.len(), 256);
        assert_eq!(encoded.header.len() % 128, 0);
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let mut bytes = GenericRecord::new(b"abc".to_vec()).to_bytes().expect("encode");
        bytes[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert!(GenericRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = vec![0u8; 2048];
        buf.extend(GenericRecord::new(b"at 2048".to_vec()).to_bytes().expect("encode"));
        let decoded = GenericRecord::decode(&mut Cursor::new(&buf), 2048).expect("decode");
        assert_eq!(decoded.data, b"at 2048");
    }
}
