//! The two 1024-byte header blocks at the start of every container file.
//!
//! The archive-level block comes first and carries the `SqPack` magic; the
//! container-level block follows at byte 1024. Each block ends with a SHA-1
//! digest of its own first 959 bytes, stored at byte 960 of the block.
//!
//! Containers created by this crate carry the sentinel pair `1337, 1337` at
//! file offset 24, which is how modded containers are told apart from the
//! ones shipped with the game.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use sha1::{Digest, Sha1};

use crate::error::{FormatError, FormatResult};

/// `SqPack\0\0`
pub const SQPACK_MAGIC: [u8; 8] = *b"SqPack\0\0";

/// Size of each header block.
pub const HEADER_BLOCK_SIZE: usize = 1024;

/// Offset of the SHA-1 digest within a header block.
pub const DIGEST_OFFSET: usize = 960;

/// Number of leading bytes the digest covers.
pub const DIGEST_COVERAGE: usize = 959;

/// Value of both fields of the modded sentinel pair.
pub const MODDED_SENTINEL: u32 = 1337;

/// File offset of the modded sentinel pair.
pub const MODDED_SENTINEL_OFFSET: u64 = 24;

/// First byte after both header blocks.
pub const FIRST_RECORD_OFFSET: u64 = 2 * HEADER_BLOCK_SIZE as u64;

/// Default maximum size written into new container headers.
pub const DEFAULT_MAX_SIZE: u32 = 2_000_000_000;

fn block_digest(block: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(&block[..DIGEST_COVERAGE]);
    hasher.finalize().into()
}

fn seal_block(fields: &[u8]) -> [u8; HEADER_BLOCK_SIZE] {
    let mut block = [0u8; HEADER_BLOCK_SIZE];
    block[..fields.len()].copy_from_slice(fields);
    let digest = block_digest(&block);
    block[DIGEST_OFFSET..DIGEST_OFFSET + digest.len()].copy_from_slice(&digest);
    block
}

fn check_block(data: &[u8]) -> FormatResult<()> {
    if data.len() < HEADER_BLOCK_SIZE {
        return Err(FormatError::InvalidHeader(format!(
            "header block needs {HEADER_BLOCK_SIZE} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

fn digest_matches(block: &[u8]) -> bool {
    block.len() >= HEADER_BLOCK_SIZE
        && block[DIGEST_OFFSET..DIGEST_OFFSET + 20] == block_digest(block)
}

/// Archive-level header block
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ArchiveHeader {
    /// `SqPack\0\0`
    pub magic: [u8; 8],
    /// Platform id (0 = win32)
    pub platform: u32,
    /// Header block size (1024)
    pub header_size: u32,
    /// Format version (1)
    pub version: u32,
    /// Archive kind (1 = data)
    pub kind: u32,
    /// First sentinel field
    pub sentinel_a: u32,
    /// Second sentinel field
    pub sentinel_b: u32,
}

impl ArchiveHeader {
    /// Header for a container created by this crate.
    pub const fn modded() -> Self {
        Self {
            magic: SQPACK_MAGIC,
            platform: 0,
            header_size: HEADER_BLOCK_SIZE as u32,
            version: 1,
            kind: 1,
            sentinel_a: MODDED_SENTINEL,
            sentinel_b: MODDED_SENTINEL,
        }
    }

    /// Whether the sentinel pair is present.
    pub const fn is_modded(&self) -> bool {
        self.sentinel_a == MODDED_SENTINEL && self.sentinel_b == MODDED_SENTINEL
    }

    /// Parse the block at the start of `data`.
    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        check_block(data)?;
        let header = Self::read_le(&mut Cursor::new(data))?;
        if header.magic != SQPACK_MAGIC {
            return Err(FormatError::InvalidHeader(format!(
                "bad archive magic {:?}",
                header.magic
            )));
        }
        Ok(header)
    }

    /// Serialize to a sealed 1024-byte block.
    pub fn to_bytes(&self) -> FormatResult<[u8; HEADER_BLOCK_SIZE]> {
        let mut fields = Vec::with_capacity(32);
        self.write_le(&mut Cursor::new(&mut fields))?;
        Ok(seal_block(&fields))
    }

    /// Check the digest of a raw archive block.
    pub fn verify_digest(block: &[u8]) -> bool {
        digest_matches(block)
    }
}

/// Container-level header block
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ContainerHeader {
    /// Header block size (1024)
    pub header_size: u32,
    /// Always 0
    pub reserved_0: u32,
    /// Block size constant (16)
    pub block_size: u32,
    /// Maximum buffer size constant (2048)
    pub max_buffer_size: u32,
    /// Fixed `2`
    pub kind: u32,
    /// Always 0
    pub reserved_1: u32,
    /// Maximum container size
    pub max_size: u32,
    /// Always 0
    pub reserved_2: u32,
}

impl ContainerHeader {
    /// Header for a container created by this crate.
    pub const fn modded() -> Self {
        Self {
            header_size: HEADER_BLOCK_SIZE as u32,
            reserved_0: 0,
            block_size: 16,
            max_buffer_size: 2048,
            kind: 2,
            reserved_1: 0,
            max_size: DEFAULT_MAX_SIZE,
            reserved_2: 0,
        }
    }

    /// Parse the block at the start of `data`.
    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        check_block(data)?;
        Ok(Self::read_le(&mut Cursor::new(data))?)
    }

    /// Serialize to a sealed 1024-byte block.
    pub fn to_bytes(&self) -> FormatResult<[u8; HEADER_BLOCK_SIZE]> {
        let mut fields = Vec::with_capacity(32);
        self.write_le(&mut Cursor::new(&mut fields))?;
        Ok(seal_block(&fields))
    }

    /// Check the digest of a raw container block.
    pub fn verify_digest(block: &[u8]) -> bool {
        digest_matches(block)
    }
}

/// Both header blocks of a freshly created modded container.
pub fn modded_container_prologue() -> FormatResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(2 * HEADER_BLOCK_SIZE);
    bytes.extend_from_slice(&ArchiveHeader::modded().to_bytes()?);
    bytes.extend_from_slice(&ContainerHeader::modded().to_bytes()?);
    Ok(bytes)
}

/// Whether the 8 bytes read from [`MODDED_SENTINEL_OFFSET`] hold the
/// sentinel pair.
pub fn is_sentinel_pair(bytes: &[u8; 8]) -> bool {
    let a = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let b = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    a == MODDED_SENTINEL && b == MODDED_SENTINEL
}
