//! Record, chunk and header codecs for SqPack dat containers.
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // SqPack terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::redundant_closure)] // Iterator chains
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::must_use_candidate)]
//! A dat container is a flat file of records. Each record is a header padded
//! to 128 bytes followed by independently compressed chunks of at most
//! 16,000 raw bytes. Records are located by a packed [`DatOffset`] that also
//! names the container file they live in.
//!
//! # Supported Formats
//!
//! - **Offsets**: container number and byte position in one integer
//! - **Chunks**: 16-byte sub-header plus DEFLATE or raw payload
//! - **Generic records** (type 2): one contiguous payload
//! - **Mesh records** (type 3): metadata plus vertex/edge/index buffers per LOD
//! - **Texture records** (type 4): verbatim texture header plus mip levels
//! - **Container headers**: the two 1024-byte blocks that open every file
//!
//! Everything here works on `Read + Seek` streams or byte slices; nothing
//! touches the file system.

#![warn(missing_docs)]

pub mod chunk;
pub mod container_header;
pub mod error;
pub mod offset;
pub mod record;

pub use chunk::{
    ChunkHeader, MAX_CHUNK_SIZE, compress_chunk, compress_stream, decompress_chunk,
    decompress_chunks,
};
pub use container_header::{
    ArchiveHeader, ContainerHeader, FIRST_RECORD_OFFSET, HEADER_BLOCK_SIZE,
    modded_container_prologue,
};
pub use error::{FormatError, FormatResult};
pub use offset::{DatOffset, MAX_CONTAINER_NUMBER};
pub use record::{
    EncodedRecord, GenericRecord, MeshRecord, RecordFormat, RecordType, TextureRecord,
    compressed_record_size, peek_record_type,
};
