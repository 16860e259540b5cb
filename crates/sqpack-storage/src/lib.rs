//! SqPack dat container storage for game data overlays.
//!
//! This crate owns the container files on disk. Original containers, the
//! ones shipped with the game, are only ever read. Replacement content goes
//! into modded containers this crate creates next to them:
//!
//! - **Container files**: `{category}.win32.dat{N}` with N in 0-7
//! - **Space allocation**: reuse of gaps left by removed records, else append
//! - **Data store**: the async read/write surface, serialized by one lock
//!
//! Which byte ranges of a modded container are in use is not tracked here;
//! it comes from a [`ModLedger`] (usually the [`ModList`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use sqpack_formats::GenericRecord;
//! use sqpack_storage::{DatConfig, DatStore, DataCategory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DatStore::open(DatConfig::new("/path/to/game/sqpack/ffxiv"))?;
//! let offset = store
//!     .write_generic(DataCategory::Exd, &GenericRecord::new(b"payload".to_vec()), None)
//!     .await?;
//! let data = store.read_generic(DataCategory::Exd, offset).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Data categories and file naming
pub mod category;

// Configuration
pub mod config;

// Container files, size limits and allocation
pub mod storage;

// Index and modlist collaborators
pub mod ledger;

// Async façade
mod dat_store;

pub use category::DataCategory;
pub use config::DatConfig;
pub use dat_store::DatStore;
pub use ledger::{
    EmptyLedger, MemoryIndex, ModEntry, ModLedger, ModList, OccupiedRange, OffsetIndex,
};
pub use storage::{ContainerManager, Placement, WriteTarget};

pub use sqpack_formats::{DatOffset, FormatError, RecordType};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Offset 0 was passed where a record was expected.
    #[error("Missing offset: the record has no location")]
    MissingOffset,

    /// Record bytes carry an unknown type tag.
    #[error("Invalid record type: {0}")]
    InvalidRecordType(u32),

    /// Every container number of the category is taken.
    #[error("Maximum data size limit reached for category {category}")]
    ContainerExhausted {
        /// Category that ran out of container numbers
        category: DataCategory,
    },

    /// Container missing or unusable for the requested operation.
    #[error("Invalid container {number} of {category}: {reason}")]
    InvalidContainer {
        /// Category of the container
        category: DataCategory,
        /// Container number
        number: u8,
        /// What is wrong with it
        reason: String,
    },

    /// Record, chunk or header codec error.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Modlist or index error.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform segment of container file names.
pub const PLATFORM: &str = "win32";

/// Alignment of every record written into a modded container.
pub const WRITE_ALIGNMENT: u64 = 256;
