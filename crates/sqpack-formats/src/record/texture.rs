//! Texture records (type 4).
//!
//! Layout after the preamble:
//!
//! | Offset | Size  | Field |
//! |--------|-------|-------|
//! | 0x14   | 4     | Mip count |
//! | 0x18   | 20×m  | [`MipEntry`] per mip level |
//! | ...    | 2×n   | Stored chunk lengths (`u16`) |
//!
//! The texture's own header is stored verbatim right after the record
//! header, so mip offsets (relative to the record header end) start at its
//! length. Its length is implied: total raw size minus the mip sizes.
//! Decoded, a texture is that header followed by every mip, largest first;
//! [`TextureLayout`] locates each part in that stream.

use std::io::{Read, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};

use super::mesh::SectionSpan;
use super::{
    ChunkGroup, EncodedRecord, HEADER_ALIGNMENT, PREAMBLE_SIZE, RecordFormat, RecordPreamble,
    RecordType, build_preamble, to_u16, to_u32, write_padded_header,
};
use crate::chunk::{align_up, decompress_chunks};
use crate::error::{FormatError, FormatResult};

/// Smallest mip size in a standard chain.
const MIN_MIP_SIZE: u32 = 16;

/// Per-mip entry of a texture record header
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
pub struct MipEntry {
    /// Offset of the first chunk relative to the record header end
    pub offset: u32,
    /// Total stored size of the mip's chunks
    pub compressed_size: u32,
    /// Decoded size of the mip
    pub uncompressed_size: u32,
    /// Index of the first chunk in the chunk-length table
    pub chunk_start: u32,
    /// Number of chunks
    pub chunk_count: u32,
}

/// Header of a texture record
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct TextureHeader {
    /// Shared preamble
    pub preamble: RecordPreamble,
    /// Number of mip levels
    pub mip_count: u32,
    /// Mip table
    #[br(count = mip_count)]
    pub mips: Vec<MipEntry>,
    /// Stored length of every chunk, in physical order
    #[br(count = mips.iter().map(|m| m.chunk_count as usize).sum::<usize>())]
    pub chunk_sizes: Vec<u16>,
}

impl TextureHeader {
    /// Unpadded header size for `mip_count` mips split into `chunk_count` chunks.
    pub const fn table_len(mip_count: usize, chunk_count: usize) -> usize {
        PREAMBLE_SIZE + 4 + mip_count * 20 + chunk_count * 2
    }

    /// Read and validate the header at `offset`.
    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let header = Self::read_le(reader)?;
        header.preamble.validate(
            RecordType::Texture,
            Self::table_len(header.mips.len(), header.chunk_sizes.len()),
        )?;

        for mip in &header.mips {
            let start = mip.chunk_start as usize;
            let end = start + mip.chunk_count as usize;
            let stored: u32 = header
                .chunk_sizes
                .get(start..end)
                .ok_or_else(|| {
                    FormatError::InvalidHeader(format!(
                        "mip chunks {start}..{end} outside a table of {}",
                        header.chunk_sizes.len()
                    ))
                })?
                .iter()
                .map(|&len| u32::from(len))
                .sum();
            if stored != mip.compressed_size {
                return Err(FormatError::InvalidHeader(format!(
                    "mip declares {} stored bytes, chunk table sums to {stored}",
                    mip.compressed_size
                )));
            }
        }
        Ok(header)
    }

    /// Length of the verbatim texture header that precedes the mips.
    pub fn texture_header_len(&self) -> FormatResult<u64> {
        let mip_total: u64 = self
            .mips
            .iter()
            .map(|mip| u64::from(mip.uncompressed_size))
            .sum();
        u64::from(self.preamble.raw_size)
            .checked_sub(mip_total)
            .ok_or_else(|| {
                FormatError::InvalidHeader(format!(
                    "mips hold {mip_total} bytes, record declares {}",
                    self.preamble.raw_size
                ))
            })
    }

    /// Record header, texture header and every stored chunk.
    pub fn footprint(&self) -> FormatResult<u64> {
        Ok(u64::from(self.preamble.header_length)
            + self.texture_header_len()?
            + self.chunk_sizes.iter().map(|&len| u64::from(len)).sum::<u64>())
    }

    /// Where the texture header and each mip start in the decoded stream.
    pub fn uncompressed_layout(&self) -> FormatResult<TextureLayout> {
        // Bounded by raw_size, so it fits
        let header_len = self.texture_header_len()? as u32;
        Ok(TextureLayout::from_sizes(
            header_len,
            self.mips.iter().map(|mip| mip.uncompressed_size),
        ))
    }
}

/// Decoded-stream layout of a texture record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureLayout {
    /// Verbatim texture header, always at 0
    pub texture_header: SectionSpan,
    /// Mip levels, largest first
    pub mips: Vec<SectionSpan>,
    /// Length of the whole decoded stream
    pub total: u32,
}

impl TextureLayout {
    fn from_sizes(header_len: u32, mip_sizes: impl IntoIterator<Item = u32>) -> Self {
        let mut position = header_len;
        let mips = mip_sizes
            .into_iter()
            .map(|size| {
                let span = SectionSpan {
                    offset: position,
                    size,
                };
                position = position.saturating_add(size);
                span
            })
            .collect();

        Self {
            texture_header: SectionSpan {
                offset: 0,
                size: header_len,
            },
            mips,
            total: position,
        }
    }
}

/// Mip sizes of a standard chain: each level a quarter of the previous one,
/// never below 16 bytes.
pub fn expected_mip_sizes(first: u32, count: usize) -> Vec<u32> {
    let mut sizes = Vec::with_capacity(count);
    let mut size = first;
    for _ in 0..count {
        sizes.push(size);
        size = (size / 4).max(MIN_MIP_SIZE);
    }
    sizes
}

/// Decoded texture record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureRecord {
    /// Texture header, stored uncompressed
    pub texture_header: Vec<u8>,
    /// Mip level payloads, largest first
    pub mips: Vec<Vec<u8>>,
}

impl TextureRecord {
    /// Build from a texture header and its mip levels.
    pub const fn new(texture_header: Vec<u8>, mips: Vec<Vec<u8>>) -> Self {
        Self {
            texture_header,
            mips,
        }
    }

    /// Whether the mip sizes follow the quarter-per-level chain.
    pub fn has_standard_mip_chain(&self) -> bool {
        let Some(first) = self.mips.first() else {
            return true;
        };
        let expected = expected_mip_sizes(first.len() as u32, self.mips.len());
        self.mips
            .iter()
            .zip(expected)
            .all(|(mip, size)| mip.len() == size as usize)
    }

    /// Where the texture header and each mip start in the decoded stream.
    pub fn uncompressed_layout(&self) -> TextureLayout {
        TextureLayout::from_sizes(
            self.texture_header.len() as u32,
            self.mips.iter().map(|mip| mip.len() as u32),
        )
    }

    /// Texture header followed by every mip.
    pub fn to_uncompressed(&self) -> Vec<u8> {
        let mut data = self.texture_header.clone();
        for mip in &self.mips {
            data.extend_from_slice(mip);
        }
        data
    }
}

impl RecordFormat for TextureRecord {
    const RECORD_TYPE: RecordType = RecordType::Texture;

    fn encode(&self) -> FormatResult<EncodedRecord> {
        let groups = self
            .mips
            .iter()
            .map(|mip| ChunkGroup::compress(mip))
            .collect::<FormatResult<Vec<_>>>()?;

        let mut mips = Vec::with_capacity(groups.len());
        let mut chunk_sizes = Vec::new();
        let mut position = self.texture_header.len();
        for group in &groups {
            mips.push(MipEntry {
                offset: to_u32(position, "mip offset")?,
                compressed_size: to_u32(group.stored_len(), "mip stored size")?,
                uncompressed_size: to_u32(group.raw_len, "mip size")?,
                chunk_start: to_u32(chunk_sizes.len(), "chunk index")?,
                chunk_count: to_u32(group.chunks.len(), "chunk count")?,
            });
            for len in group.chunk_lengths() {
                chunk_sizes.push(to_u16(len, "chunk length")?);
            }
            position += group.stored_len();
        }

        let mut body = Vec::with_capacity(1 + chunk_sizes.len());
        body.push(self.texture_header.clone());
        body.extend(groups.iter().flat_map(|group| group.chunks.iter().cloned()));

        let raw_size =
            self.texture_header.len() + groups.iter().map(|group| group.raw_len).sum::<usize>();
        let header_length = align_up(
            TextureHeader::table_len(mips.len(), chunk_sizes.len()),
            HEADER_ALIGNMENT,
        );

        let header = TextureHeader {
            preamble: build_preamble(Self::RECORD_TYPE, header_length, raw_size, &body, &groups)?,
            mip_count: to_u32(mips.len(), "mip count")?,
            mips,
            chunk_sizes,
        };

        Ok(EncodedRecord {
            header: write_padded_header(&header)?,
            body,
        })
    }

    fn decode<R: Read + Seek>(reader: &mut R, offset: u64) -> FormatResult<Self> {
        let header = TextureHeader::read_at(reader, offset)?;
        let data_start = offset + u64::from(header.preamble.header_length);

        let header_len = usize::try_from(header.texture_header_len()?).map_err(|_| {
            FormatError::InvalidHeader("texture header does not fit in memory".to_string())
        })?;
        let mut texture_header = vec![0u8; header_len];
        reader.seek(SeekFrom::Start(data_start))?;
        reader.read_exact(&mut texture_header)?;

        let mut mips = Vec::with_capacity(header.mips.len());
        for entry in &header.mips {
            let mip = decompress_chunks(
                reader,
                entry.chunk_count as usize,
                data_start + u64::from(entry.offset),
            )?;
            if mip.len() != entry.uncompressed_size as usize {
                return Err(FormatError::InvalidHeader(format!(
                    "mip declares {} bytes, decoded {}",
                    entry.uncompressed_size,
                    mip.len()
                )));
            }
            mips.push(mip);
        }

        Ok(Self {
            texture_header,
            mips,
        })
    }
}
