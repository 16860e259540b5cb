//! Record header codecs.
//!
//! A record is what an offset points at: a header padded to 128 bytes,
//! followed by the chunk groups of its payload sections. All three record
//! types share a 20-byte preamble:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 4    | Header length, including padding |
//! | 0x04   | 4    | Record type (2, 3 or 4) |
//! | 0x08   | 4    | Total uncompressed payload size |
//! | 0x0C   | 4    | Stored payload size in 128-byte units |
//! | 0x10   | 4    | Largest chunk in 128-byte units |
//!
//! The type-specific tables follow, see [`generic`], [`mesh`] and [`texture`].

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};

use crate::chunk::{CHUNK_ALIGNMENT, MAX_CHUNK_SIZE, align_up, compress_stream};
use crate::error::{FormatError, FormatResult};

pub mod generic;
pub mod mesh;
pub mod texture;

pub use generic::{GenericChunkEntry, GenericHeader, GenericRecord};
pub use mesh::{
    LOD_SLOTS, LodBuffers, LodEntries, LodSpans, MeshHeader, MeshLayout, MeshMetadata, MeshRecord,
    SectionEntry, SectionSpan,
};
pub use texture::{MipEntry, TextureHeader, TextureLayout, TextureRecord, expected_mip_sizes};

/// Size of the shared record preamble.
pub const PREAMBLE_SIZE: usize = 20;

/// Record headers are padded to this boundary.
pub const HEADER_ALIGNMENT: usize = 128;

/// Record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordType {
    /// Generic blob
    Generic = 2,
    /// Multi-buffer mesh data
    Mesh = 3,
    /// Mip-mapped texture data
    Texture = 4,
}

impl RecordType {
    /// Parse from the on-disk tag.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(Self::Generic),
            3 => Some(Self::Mesh),
            4 => Some(Self::Texture),
            _ => None,
        }
    }

    /// The on-disk tag.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RecordType {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(FormatError::InvalidRecordType(value))
    }
}

/// Preamble shared by every record header
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct RecordPreamble {
    /// Header length including padding
    pub header_length: u32,
    /// Record type tag
    pub record_type: u32,
    /// Total uncompressed payload size
    pub raw_size: u32,
    /// Stored payload size in 128-byte units
    pub compressed_units: u32,
    /// Largest chunk in 128-byte units
    pub buffer_units: u32,
}

impl RecordPreamble {
    /// Check the type tag against `expected` and the header length against
    /// the space the parsed tables need.
    pub fn validate(&self, expected: RecordType, parsed_len: usize) -> FormatResult<()> {
        let actual = RecordType::try_from(self.record_type)?;
        if actual != expected {
            return Err(FormatError::InvalidHeader(format!(
                "expected {expected:?} record, found {actual:?}"
            )));
        }

        let header_length = self.header_length as usize;
        if header_length % HEADER_ALIGNMENT != 0 || header_length < parsed_len {
            return Err(FormatError::InvalidHeader(format!(
                "header length {header_length} does not cover {parsed_len} header bytes"
            )));
        }
        Ok(())
    }
}

/// A record ready to be written: padded header plus stored body blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Header, padded to 128 bytes
    pub header: Vec<u8>,
    /// Body blocks in physical order: chunks, and for textures the verbatim
    /// texture header ahead of them
    pub body: Vec<Vec<u8>>,
}

impl EncodedRecord {
    /// Total length of header and body.
    pub fn len(&self) -> usize {
        self.header.len() + self.body.iter().map(Vec::len).sum::<usize>()
    }

    /// Whether the record has no bytes at all (never true for encoded records).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate header and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.header);
        for block in &self.body {
            bytes.extend_from_slice(block);
        }
        bytes
    }
}

/// Symmetric codec for one record type.
pub trait RecordFormat: Sized {
    /// Type tag written into the preamble.
    const RECORD_TYPE: RecordType;

    /// Compress every payload section and build the header.
    fn encode(&self) -> FormatResult<EncodedRecord>;

    /// Decode the record whose header starts at `offset`.
    fn decode<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self>;

    /// Encode and concatenate.
    fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        Ok(self.encode()?.to_bytes())
    }

    /// Decode a record from an in-memory buffer starting at byte 0.
    fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        Self::decode(&mut Cursor::new(data), 0)
    }
}

/// One payload section compressed into chunks.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChunkGroup {
    pub chunks: Vec<Vec<u8>>,
    pub raw_len: usize,
}

impl ChunkGroup {
    pub fn compress(section: &[u8]) -> FormatResult<Self> {
        Ok(Self {
            chunks: compress_stream(section, MAX_CHUNK_SIZE)?,
            raw_len: section.len(),
        })
    }

    pub fn stored_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn chunk_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.chunks.iter().map(Vec::len)
    }
}

/// Preamble for a freshly encoded record.
pub(crate) fn build_preamble(
    record_type: RecordType,
    header_length: usize,
    raw_size: usize,
    body: &[Vec<u8>],
    groups: &[ChunkGroup],
) -> FormatResult<RecordPreamble> {
    let body_len: usize = body.iter().map(Vec::len).sum();
    let largest = groups
        .iter()
        .flat_map(ChunkGroup::chunk_lengths)
        .max()
        .unwrap_or(0);

    Ok(RecordPreamble {
        header_length: to_u32(header_length, "header length")?,
        record_type: record_type.as_u32(),
        raw_size: to_u32(raw_size, "payload size")?,
        compressed_units: to_u32(body_len.div_ceil(CHUNK_ALIGNMENT), "stored size")?,
        buffer_units: to_u32(largest / CHUNK_ALIGNMENT, "chunk size")?,
    })
}

/// Serialize a header value and pad it to [`HEADER_ALIGNMENT`].
pub(crate) fn write_padded_header<H>(header: &H) -> FormatResult<Vec<u8>>
where
    H: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut buf = Vec::new();
    header.write_le(&mut Cursor::new(&mut buf))?;
    buf.resize(align_up(buf.len(), HEADER_ALIGNMENT), 0);
    Ok(buf)
}

pub(crate) fn to_u32(value: usize, what: &str) -> FormatResult<u32> {
    u32::try_from(value)
        .map_err(|_| FormatError::InvalidHeader(format!("{what} {value} does not fit in 32 bits")))
}

pub(crate) fn to_u16(value: usize, what: &str) -> FormatResult<u16> {
    u16::try_from(value)
        .map_err(|_| FormatError::InvalidHeader(format!("{what} {value} does not fit in 16 bits")))
}

/// Read the record type tag from an encoded record (`bytes[4..8]`).
pub fn peek_record_type(bytes: &[u8]) -> FormatResult<RecordType> {
    let tag = bytes
        .get(4..8)
        .ok_or_else(|| FormatError::InvalidHeader(format!("record of {} bytes", bytes.len())))?;
    RecordType::try_from(u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]))
}

/// Read the preamble of the record at `offset`.
pub fn read_preamble<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<RecordPreamble> {
    reader.seek(SeekFrom::Start(offset))?;
    Ok(RecordPreamble::read_le(reader)?)
}

/// On-disk footprint of the record at `offset`: header plus every stored
/// byte, taken from the chunk-length table without decoding any chunk.
pub fn compressed_record_size<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<u64> {
    let preamble = read_preamble(reader, offset)?;
    let footprint = match RecordType::try_from(preamble.record_type)? {
        RecordType::Generic => GenericHeader::read_at(reader, offset)?.footprint(),
        RecordType::Mesh => MeshHeader::read_at(reader, offset)?.footprint(),
        RecordType::Texture => TextureHeader::read_at(reader, offset)?.footprint()?,
    };
    Ok(footprint)
}
