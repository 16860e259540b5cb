//! Packed dat offsets.
//!
//! A single integer carries both the container number (0-7) and the byte
//! position of a record inside that container:
//!
//! ```text
//! container = ((offset / 8) & 0xF) / 2
//! position  = offset - 16 * container
//! ```
//!
//! The low four bits of `offset / 8` hold the container number, so a
//! position must be a multiple of 128 to survive the round trip. Records
//! are always written on 128-byte (original) or 256-byte (modded)
//! boundaries, so this never constrains real data.
//!
//! Index files store `offset / 8` as a 32-bit value; [`DatOffset::index_value`]
//! and [`DatOffset::from_index_value`] convert to and from that form.

use std::fmt;

use crate::error::{FormatError, FormatResult};

/// Highest container number a category may use.
pub const MAX_CONTAINER_NUMBER: u8 = 7;

/// Alignment a byte position needs to be packable.
pub const POSITION_ALIGNMENT: u64 = 128;

/// Packed locator of a record: container number plus byte position.
///
/// `DatOffset(0)` means "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DatOffset(u64);

impl DatOffset {
    /// The absent offset.
    pub const ABSENT: Self = Self(0);

    /// Pack a container number and byte position.
    pub fn pack(container: u8, position: u64) -> FormatResult<Self> {
        if container > MAX_CONTAINER_NUMBER {
            return Err(FormatError::InvalidContainer(u32::from(container)));
        }
        if position % POSITION_ALIGNMENT != 0 {
            return Err(FormatError::InvalidOffset(format!(
                "byte position {position} is not a multiple of {POSITION_ALIGNMENT}"
            )));
        }

        position
            .checked_add(16 * u64::from(container))
            .map(Self)
            .ok_or_else(|| FormatError::InvalidOffset(format!("byte position {position} overflows")))
    }

    /// Split into `(container, position)`.
    ///
    /// The absent offset is rejected; callers check [`Self::is_absent`] first.
    pub fn unpack(self) -> FormatResult<(u8, u64)> {
        if self.is_absent() {
            return Err(FormatError::InvalidOffset("offset is absent".to_string()));
        }
        if self.0 % 8 != 0 {
            return Err(FormatError::InvalidOffset(format!(
                "offset {:#x} is not a multiple of 8",
                self.0
            )));
        }

        let container = (((self.0 / 8) & 0xF) / 2) as u8;
        Ok((container, self.0 - 16 * u64::from(container)))
    }

    /// Container number, see [`Self::unpack`].
    pub fn container(self) -> FormatResult<u8> {
        self.unpack().map(|(container, _)| container)
    }

    /// Whether this is the "absent" offset.
    pub const fn is_absent(self) -> bool {
        self.0 == 0
    }

    /// Wrap a raw packed value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw packed value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Build from the 32-bit value stored by index files (`offset / 8`).
    pub const fn from_index_value(value: u32) -> Self {
        Self(value as u64 * 8)
    }

    /// The 32-bit value index files store (`offset / 8`).
    pub fn index_value(self) -> FormatResult<u32> {
        u32::try_from(self.0 / 8).map_err(|_| {
            FormatError::InvalidOffset(format!(
                "offset {:#x} does not fit a 32-bit index value",
                self.0
            ))
        })
    }
}

impl fmt::Display for DatOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
