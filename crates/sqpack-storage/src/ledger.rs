//! Index and modlist collaborators.
//!
//! The data store never decides on its own which parts of a modded
//! container are in use, and it never maps game paths to offsets. Both come
//! from outside through two small traits:
//!
//! - [`ModLedger`]: occupied byte ranges per container, feeding the allocator
//! - [`OffsetIndex`]: path to offset lookup, updated after imports
//!
//! [`ModList`] and [`MemoryIndex`] are the reference implementations.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqpack_formats::DatOffset;
use tracing::debug;

use crate::{DataCategory, Result, StorageError};

/// A byte range of a container that holds a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OccupiedRange {
    /// First byte of the record
    pub start: u64,
    /// Length of the record in bytes
    pub size: u64,
}

impl OccupiedRange {
    /// Create a range.
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// One past the last byte.
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Source of occupied ranges for the space allocator.
pub trait ModLedger: Send + Sync {
    /// Ranges in use in one container, ascending by start.
    fn occupied_ranges(&self, category: DataCategory, container: u8) -> Vec<OccupiedRange>;
}

/// Ledger that knows of no records; every write appends.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLedger;

impl ModLedger for EmptyLedger {
    fn occupied_ranges(&self, _category: DataCategory, _container: u8) -> Vec<OccupiedRange> {
        Vec::new()
    }
}

/// Path to offset lookup.
pub trait OffsetIndex {
    /// Offset of `path`, [`DatOffset::ABSENT`] when unknown.
    fn get_offset(&self, path: &str) -> DatOffset;

    /// Point `path` at `offset` and return the previous offset.
    fn set_offset(&mut self, path: &str, offset: DatOffset) -> DatOffset;
}

/// In-memory [`OffsetIndex`]
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    offsets: HashMap<String, DatOffset>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known paths.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no path is known.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl OffsetIndex for MemoryIndex {
    fn get_offset(&self, path: &str) -> DatOffset {
        self.offsets.get(path).copied().unwrap_or(DatOffset::ABSENT)
    }

    fn set_offset(&mut self, path: &str, offset: DatOffset) -> DatOffset {
        self.offsets
            .insert(path.to_string(), offset)
            .unwrap_or(DatOffset::ABSENT)
    }
}

/// One replaced game file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    /// Game path of the file
    pub path: String,
    /// Category the record lives in
    pub category: DataCategory,
    /// Raw packed offset of the unmodified record
    pub original_offset: u64,
    /// Raw packed offset of the replacement record
    pub modded_offset: u64,
    /// Bytes the replacement record occupies
    pub modded_size: u64,
    /// Whether the index currently points at the replacement
    pub enabled: bool,
}

impl ModEntry {
    /// Offset of the unmodified record.
    pub const fn original(&self) -> DatOffset {
        DatOffset::from_raw(self.original_offset)
    }

    /// Offset of the replacement record.
    pub const fn modded(&self) -> DatOffset {
        DatOffset::from_raw(self.modded_offset)
    }
}

/// JSON-backed list of replaced files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModList {
    /// Entries in the order they were first written
    pub entries: Vec<ModEntry>,
}

impl ModList {
    /// Create an empty modlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a modlist; a missing file yields an empty list.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No modlist at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| StorageError::Ledger(format!("{}: {e}", path.display())))
    }

    /// Write the modlist as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Ledger(format!("failed to serialize modlist: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Entry for `path`.
    pub fn entry(&self, path: &str) -> Option<&ModEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Record that `path` now lives at `offset`, occupying `size` bytes.
    ///
    /// `original_offset` is only kept from the first write of a path.
    pub fn record_write(
        &mut self,
        path: &str,
        category: DataCategory,
        offset: DatOffset,
        size: u64,
        original_offset: DatOffset,
    ) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.path == path) {
            entry.category = category;
            entry.modded_offset = offset.raw();
            entry.modded_size = size;
            entry.enabled = true;
            return;
        }

        self.entries.push(ModEntry {
            path: path.to_string(),
            category,
            original_offset: original_offset.raw(),
            modded_offset: offset.raw(),
            modded_size: size,
            enabled: true,
        });
    }

    /// Flip the enabled flag of `path`; `false` when the path is unknown.
    pub fn set_enabled(&mut self, path: &str, enabled: bool) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.path == path) else {
            return false;
        };
        entry.enabled = enabled;
        true
    }

    /// Drop the entry for `path`, freeing its range for reuse.
    pub fn remove(&mut self, path: &str) -> Option<ModEntry> {
        let index = self.entries.iter().position(|entry| entry.path == path)?;
        Some(self.entries.remove(index))
    }
}

impl ModLedger for ModList {
    /// Disabled entries still occupy their range: they can be re-enabled
    /// without rewriting.
    fn occupied_ranges(&self, category: DataCategory, container: u8) -> Vec<OccupiedRange> {
        let mut ranges: Vec<OccupiedRange> = self
            .entries
            .iter()
            .filter(|entry| entry.category == category && entry.modded_offset != 0)
            .filter_map(|entry| match entry.modded().unpack() {
                Ok((number, position)) if number == container => {
                    Some(OccupiedRange::new(position, entry.modded_size))
                }
                _ => None,
            })
            .collect();
        ranges.sort_unstable();
        ranges
    }
}

impl<L: ModLedger> ModLedger for RwLock<L> {
    fn occupied_ranges(&self, category: DataCategory, container: u8) -> Vec<OccupiedRange> {
        self.read().occupied_ranges(category, container)
    }
}
