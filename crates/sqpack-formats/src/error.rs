//! Format error types

use thiserror::Error;

/// Error type for dat record, chunk and header codecs
#[derive(Debug, Error)]
pub enum FormatError {
    /// Record type tag is not one of 2, 3 or 4
    #[error("invalid record type: {0}")]
    InvalidRecordType(u32),

    /// Container number outside 0..=7
    #[error("invalid container number: {0} (must be 0-7)")]
    InvalidContainer(u32),

    /// Offset cannot be packed or unpacked
    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    /// Non-zero byte found where chunk padding was expected
    #[error("corrupt chunk padding at byte {offset}")]
    CorruptPadding {
        /// Absolute stream position of the first non-zero padding byte
        offset: u64,
    },

    /// Decoded chunk length disagrees with its sub-header
    #[error("chunk size mismatch at {offset}: header declares {expected} bytes, got {actual}")]
    ChunkSizeMismatch {
        /// Stream position of the chunk sub-header
        offset: u64,
        /// Uncompressed size declared by the sub-header
        expected: usize,
        /// Bytes actually produced
        actual: usize,
    },

    /// Chunk input larger than the per-chunk limit
    #[error("invalid chunk size: {size} bytes (must be between {min} and {max} bytes)")]
    InvalidChunkSize {
        /// The invalid size that was provided
        size: usize,
        /// Minimum allowed size
        min: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Record or container header is malformed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Compression/decompression error
    #[error("compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
