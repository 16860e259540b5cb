//! Mesh records (type 3).
//!
//! A mesh carries ten independently chunked buffers: one metadata block,
//! then for each of three level-of-detail slots a vertex buffer, an edge
//! geometry buffer (usually empty) and an index buffer.
//!
//! On disk the header stores five parallel ten-entry arrays in kind-major
//! order (`metadata, vertex×3, edge×3, index×3`), followed by trailing
//! metadata and the flat chunk-length table:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x14   | 4    | Version |
//! | 0x18   | 40   | Uncompressed sizes |
//! | 0x40   | 40   | Stored sizes |
//! | 0x68   | 40   | Offsets relative to header end |
//! | 0x90   | 20   | First chunk index (`u16`) |
//! | 0xA4   | 20   | Chunk counts (`u16`) |
//! | 0xB8   | 2    | Mesh count |
//! | 0xBA   | 2    | Material count |
//! | 0xBC   | 1    | LOD count |
//! | 0xBD   | 1    | Index streaming flag |
//! | 0xBE   | 1    | Edge geometry flag |
//! | 0xBF   | 1    | Padding |
//! | 0xC0   | 2×n  | Stored chunk lengths (`u16`) |
//!
//! The chunks themselves are laid out metadata first, then LOD by LOD.
//! In memory the arrays are held as one [`SectionEntry`] per buffer, grouped
//! per LOD slot in [`LodEntries`].

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinResult, BinWrite};

use super::{
    ChunkGroup, EncodedRecord, HEADER_ALIGNMENT, PREAMBLE_SIZE, RecordFormat, RecordPreamble,
    RecordType, build_preamble, to_u16, to_u32, write_padded_header,
};
use crate::chunk::{align_up, decompress_chunks};
use crate::error::{FormatError, FormatResult};

/// Number of level-of-detail slots.
pub const LOD_SLOTS: usize = 3;

/// Metadata plus vertex/edge/index per LOD slot.
const SECTION_COUNT: usize = 1 + 3 * LOD_SLOTS;

/// Header entry describing one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionEntry {
    /// Decoded size of the buffer
    pub uncompressed_size: u32,
    /// Total stored size of the buffer's chunks
    pub compressed_size: u32,
    /// Offset of the first chunk relative to the header end
    pub offset: u32,
    /// Index of the first chunk in the chunk-length table
    pub chunk_start: u16,
    /// Number of chunks
    pub chunk_count: u16,
}

/// Header entries of one LOD slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LodEntries {
    /// Vertex buffer
    pub vertex: SectionEntry,
    /// Edge geometry buffer
    pub edge: SectionEntry,
    /// Index buffer
    pub index: SectionEntry,
}

/// Header of a mesh record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshHeader {
    /// Shared preamble
    pub preamble: RecordPreamble,
    /// Mesh format version
    pub version: u32,
    /// Metadata block
    pub metadata: SectionEntry,
    /// Per-LOD buffers
    pub lods: [LodEntries; LOD_SLOTS],
    /// Number of meshes
    pub mesh_count: u16,
    /// Number of materials
    pub material_count: u16,
    /// Number of populated LOD slots
    pub lod_count: u8,
    /// Index buffer streaming flag
    pub index_streaming: u8,
    /// Edge geometry flag
    pub edge_geometry: u8,
    /// Padding byte
    pub padding: u8,
    /// Stored length of every chunk, in physical order
    pub chunk_sizes: Vec<u16>,
}

impl MeshHeader {
    /// Unpadded header size for `chunk_count` chunks.
    pub const fn table_len(chunk_count: usize) -> usize {
        PREAMBLE_SIZE + 4 + SECTION_COUNT * (3 * 4 + 2 * 2) + 8 + chunk_count * 2
    }

    /// Read and validate the header at `offset`.
    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let header = Self::read_le(reader)?;
        header
            .preamble
            .validate(RecordType::Mesh, Self::table_len(header.chunk_sizes.len()))?;

        for entry in header.physical_order() {
            let start = usize::from(entry.chunk_start);
            let end = start + usize::from(entry.chunk_count);
            let stored: u32 = header
                .chunk_sizes
                .get(start..end)
                .ok_or_else(|| {
                    FormatError::InvalidHeader(format!(
                        "chunks {start}..{end} outside a table of {}",
                        header.chunk_sizes.len()
                    ))
                })?
                .iter()
                .map(|&len| u32::from(len))
                .sum();
            if stored != entry.compressed_size {
                return Err(FormatError::InvalidHeader(format!(
                    "section declares {} stored bytes, chunk table sums to {stored}",
                    entry.compressed_size
                )));
            }
        }
        Ok(header)
    }

    /// Header plus every stored chunk.
    pub fn footprint(&self) -> u64 {
        u64::from(self.preamble.header_length)
            + self.chunk_sizes.iter().map(|&len| u64::from(len)).sum::<u64>()
    }

    /// Entries in physical order: metadata, then vertex/edge/index per LOD.
    pub fn physical_order(&self) -> [SectionEntry; SECTION_COUNT] {
        let mut entries = [self.metadata; SECTION_COUNT];
        for (slot, lod) in self.lods.iter().enumerate() {
            entries[1 + 3 * slot] = lod.vertex;
            entries[2 + 3 * slot] = lod.edge;
            entries[3 + 3 * slot] = lod.index;
        }
        entries
    }

    fn kind_major(&self) -> [SectionEntry; SECTION_COUNT] {
        let mut entries = [self.metadata; SECTION_COUNT];
        for (slot, lod) in self.lods.iter().enumerate() {
            entries[1 + slot] = lod.vertex;
            entries[1 + LOD_SLOTS + slot] = lod.edge;
            entries[1 + 2 * LOD_SLOTS + slot] = lod.index;
        }
        entries
    }

    fn from_kind_major(
        entries: &[SectionEntry; SECTION_COUNT],
    ) -> (SectionEntry, [LodEntries; LOD_SLOTS]) {
        let lods = std::array::from_fn(|slot| LodEntries {
            vertex: entries[1 + slot],
            edge: entries[1 + LOD_SLOTS + slot],
            index: entries[1 + 2 * LOD_SLOTS + slot],
        });
        (entries[0], lods)
    }

    /// Where each buffer starts in the fully decoded stream.
    pub fn uncompressed_layout(&self) -> MeshLayout {
        MeshLayout::from_sizes(self.physical_order().map(|entry| entry.uncompressed_size))
    }

    /// Trailing metadata fields.
    pub const fn metadata_fields(&self) -> MeshMetadata {
        MeshMetadata {
            version: self.version,
            mesh_count: self.mesh_count,
            material_count: self.material_count,
            lod_count: self.lod_count,
            index_streaming: self.index_streaming != 0,
            edge_geometry: self.edge_geometry != 0,
        }
    }
}

impl BinRead for MeshHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let preamble = RecordPreamble::read_le(reader)?;
        let version = u32::read_le(reader)?;
        let uncompressed = <[u32; SECTION_COUNT]>::read_le(reader)?;
        let compressed = <[u32; SECTION_COUNT]>::read_le(reader)?;
        let offsets = <[u32; SECTION_COUNT]>::read_le(reader)?;
        let chunk_starts = <[u16; SECTION_COUNT]>::read_le(reader)?;
        let chunk_counts = <[u16; SECTION_COUNT]>::read_le(reader)?;

        let mesh_count = u16::read_le(reader)?;
        let material_count = u16::read_le(reader)?;
        let lod_count = u8::read_le(reader)?;
        let index_streaming = u8::read_le(reader)?;
        let edge_geometry = u8::read_le(reader)?;
        let padding = u8::read_le(reader)?;

        let total_chunks: usize = chunk_counts.iter().map(|&count| usize::from(count)).sum();
        let chunk_sizes = (0..total_chunks)
            .map(|_| u16::read_le(reader))
            .collect::<BinResult<Vec<_>>>()?;

        let entries: [SectionEntry; SECTION_COUNT] = std::array::from_fn(|i| SectionEntry {
            uncompressed_size: uncompressed[i],
            compressed_size: compressed[i],
            offset: offsets[i],
            chunk_start: chunk_starts[i],
            chunk_count: chunk_counts[i],
        });
        let (metadata, lods) = Self::from_kind_major(&entries);

        Ok(Self {
            preamble,
            version,
            metadata,
            lods,
            mesh_count,
            material_count,
            lod_count,
            index_streaming,
            edge_geometry,
            padding,
            chunk_sizes,
        })
    }
}

impl BinWrite for MeshHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let entries = self.kind_major();

        self.preamble.write_le(writer)?;
        self.version.write_le(writer)?;
        entries.map(|e| e.uncompressed_size).write_le(writer)?;
        entries.map(|e| e.compressed_size).write_le(writer)?;
        entries.map(|e| e.offset).write_le(writer)?;
        entries.map(|e| e.chunk_start).write_le(writer)?;
        entries.map(|e| e.chunk_count).write_le(writer)?;

        self.mesh_count.write_le(writer)?;
        self.material_count.write_le(writer)?;
        self.lod_count.write_le(writer)?;
        self.index_streaming.write_le(writer)?;
        self.edge_geometry.write_le(writer)?;
        self.padding.write_le(writer)?;

        for len in &self.chunk_sizes {
            len.write_le(writer)?;
        }
        Ok(())
    }
}

/// Offset and size of one buffer in the decoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionSpan {
    /// Start in the decoded stream
    pub offset: u32,
    /// Decoded size
    pub size: u32,
}

/// Decoded-stream spans of one LOD slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LodSpans {
    /// Vertex buffer
    pub vertex: SectionSpan,
    /// Edge geometry buffer
    pub edge: SectionSpan,
    /// Index buffer
    pub index: SectionSpan,
}

/// Decoded-stream layout of a mesh record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshLayout {
    /// Metadata block
    pub metadata: SectionSpan,
    /// Per-LOD buffers
    pub lods: [LodSpans; LOD_SLOTS],
    /// Length of the whole decoded stream
    pub total: u32,
}

impl MeshLayout {
    fn from_sizes(sizes: [u32; SECTION_COUNT]) -> Self {
        let mut position = 0u32;
        let spans = sizes.map(|size| {
            let span = SectionSpan {
                offset: position,
                size,
            };
            position = position.saturating_add(size);
            span
        });

        Self {
            metadata: spans[0],
            lods: std::array::from_fn(|slot| LodSpans {
                vertex: spans[1 + 3 * slot],
                edge: spans[2 + 3 * slot],
                index: spans[3 + 3 * slot],
            }),
            total: position,
        }
    }
}

/// Trailing metadata of a mesh record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshMetadata {
    /// Mesh format version
    pub version: u32,
    /// Number of meshes
    pub mesh_count: u16,
    /// Number of materials
    pub material_count: u16,
    /// Number of populated LOD slots
    pub lod_count: u8,
    /// Index buffer streaming flag
    pub index_streaming: bool,
    /// Edge geometry flag
    pub edge_geometry: bool,
}

/// Buffers of one LOD slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LodBuffers {
    /// Vertex buffer
    pub vertex: Vec<u8>,
    /// Edge geometry buffer
    pub edge: Vec<u8>,
    /// Index buffer
    pub index: Vec<u8>,
}

/// Decoded mesh record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshRecord {
    /// Trailing metadata fields
    pub meta: MeshMetadata,
    /// Metadata block
    pub metadata: Vec<u8>,
    /// Per-LOD buffers
    pub lods: [LodBuffers; LOD_SLOTS],
}

impl MeshRecord {
    /// Buffers in physical order.
    fn physical_sections(&self) -> [&[u8]; SECTION_COUNT] {
        let mut sections = [self.metadata.as_slice(); SECTION_COUNT];
        for (slot, lod) in self.lods.iter().enumerate() {
            sections[1 + 3 * slot] = lod.vertex.as_slice();
            sections[2 + 3 * slot] = lod.edge.as_slice();
            sections[3 + 3 * slot] = lod.index.as_slice();
        }
        sections
    }

    /// Where each buffer starts in the decoded stream.
    pub fn uncompressed_layout(&self) -> MeshLayout {
        MeshLayout::from_sizes(self.physical_sections().map(|s| s.len() as u32))
    }

    /// All buffers concatenated in physical order.
    pub fn to_uncompressed(&self) -> Vec<u8> {
        self.physical_sections().concat()
    }
}

fn read_section<R: Read + Seek>(
    reader: &mut R,
    data_start: u64,
    entry: &SectionEntry,
) -> FormatResult<Vec<u8>> {
    let data = decompress_chunks(
        reader,
        usize::from(entry.chunk_count),
        data_start + u64::from(entry.offset),
    )?;
    if data.len() != entry.uncompressed_size as usize {
        return Err(FormatError::InvalidHeader(format!(
            "section declares {} bytes, decoded {}",
            entry.uncompressed_size,
            data.len()
        )));
    }
    Ok(data)
}

impl RecordFormat for MeshRecord {
    const RECORD_TYPE: RecordType = RecordType::Mesh;

    fn encode(&self) -> FormatResult<EncodedRecord> {
        let groups = self
            .physical_sections()
            .iter()
            .map(|section| ChunkGroup::compress(section))
            .collect::<FormatResult<Vec<_>>>()?;

        let mut entries = [SectionEntry::default(); SECTION_COUNT];
        let mut chunk_sizes = Vec::new();
        let mut position = 0usize;
        for (entry, group) in entries.iter_mut().zip(&groups) {
            *entry = SectionEntry {
                uncompressed_size: to_u32(group.raw_len, "section size")?,
                compressed_size: to_u32(group.stored_len(), "section stored size")?,
                offset: to_u32(position, "section offset")?,
                chunk_start: to_u16(chunk_sizes.len(), "chunk index")?,
                chunk_count: to_u16(group.chunks.len(), "chunk count")?,
            };
            for len in group.chunk_lengths() {
                chunk_sizes.push(to_u16(len, "chunk length")?);
            }
            position += group.stored_len();
        }

        let body: Vec<Vec<u8>> = groups
            .iter()
            .flat_map(|group| group.chunks.iter().cloned())
            .collect();
        let raw_size = groups.iter().map(|group| group.raw_len).sum();
        let header_length = align_up(MeshHeader::table_len(chunk_sizes.len()), HEADER_ALIGNMENT);

        let lods = std::array::from_fn(|slot| LodEntries {
            vertex: entries[1 + 3 * slot],
            edge: entries[2 + 3 * slot],
            index: entries[3 + 3 * slot],
        });

        let header = MeshHeader {
            preamble: build_preamble(Self::RECORD_TYPE, header_length, raw_size, &body, &groups)?,
            version: self.meta.version,
            metadata: entries[0],
            lods,
            mesh_count: self.meta.mesh_count,
            material_count: self.meta.material_count,
            lod_count: self.meta.lod_count,
            index_streaming: u8::from(self.meta.index_streaming),
            edge_geometry: u8::from(self.meta.edge_geometry),
            padding: 0,
            chunk_sizes,
        };

        Ok(EncodedRecord {
            header: write_padded_header(&header)?,
            body,
        })
    }

    fn decode<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        let header = MeshHeader::read_at(reader, offset)?;
        let data_start = offset + u64::from(header.preamble.header_length);

        let metadata = read_section(reader, data_start, &header.metadata)?;
        let mut lods: [LodBuffers; LOD_SLOTS] = Default::default();
        for (buffers, entries) in lods.iter_mut().zip(&header.lods) {
            buffers.vertex = read_section(reader, data_start, &entries.vertex)?;
            buffers.edge = read_section(reader, data_start, &entries.edge)?;
            buffers.index = read_section(reader, data_start, &entries.index)?;
        }

        Ok(Self {
            meta: header.metadata_fields(),
            metadata,
            lods,
        })
    }
}
