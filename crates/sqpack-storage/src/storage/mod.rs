//! Container files and space management.
//!
//! This module handles the on-disk layer:
//! - Numbered container files per category, original or modded
//! - Per-container size ceilings from the host filesystem
//! - Gap reuse and append placement inside modded containers
//!
//! Original containers are never opened for writing.

pub mod allocator;
pub mod container_file;
pub mod fs_limit;

pub use allocator::{Placement, WriteTarget, aligned_size, find_reusable_slot};
pub use container_file::ContainerManager;
pub use fs_limit::{
    ADDRESSABLE_LIMIT, DEFAULT_MAX_CONTAINER_SIZE, FAT_MAX_FILE_SIZE, detect_max_container_size,
};
