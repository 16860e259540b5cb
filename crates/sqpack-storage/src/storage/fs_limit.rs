//! Per-container size ceilings derived from the host filesystem.

use std::path::Path;

use tracing::{debug, warn};

/// Ceiling used when the filesystem cannot be identified.
pub const DEFAULT_MAX_CONTAINER_SIZE: u64 = 2_000_000_000;

/// Largest file a FAT filesystem can hold.
pub const FAT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024 - 1;

/// Highest byte position a 32-bit index value (`offset / 8`) can reach.
pub const ADDRESSABLE_LIMIT: u64 = 8 * u32::MAX as u64;

#[cfg(target_os = "linux")]
mod magic {
    // From <linux/magic.h>
    pub const MSDOS: u64 = 0x4d44;
    pub const EXT4: u64 = 0xEF53;
    pub const XFS: u64 = 0x5846_5342;
    pub const BTRFS: u64 = 0x9123_683E;
    pub const TMPFS: u64 = 0x0102_1994;
    pub const OVERLAYFS: u64 = 0x794c_7630;
    pub const ZFS: u64 = 0x2fc1_2fc1;
    pub const F2FS: u64 = 0xF2F5_2010;
    pub const NTFS: u64 = 0x5346_544e;
    pub const EXFAT: u64 = 0x2011_BAB0;
}

/// Ceiling for a Linux `statfs` filesystem type, `None` when unknown.
#[cfg(target_os = "linux")]
pub const fn limit_for_fs_type(fs_type: u64) -> Option<u64> {
    match fs_type {
        magic::MSDOS => Some(FAT_MAX_FILE_SIZE),
        magic::EXT4
        | magic::XFS
        | magic::BTRFS
        | magic::TMPFS
        | magic::OVERLAYFS
        | magic::ZFS
        | magic::F2FS
        | magic::NTFS
        | magic::EXFAT => Some(ADDRESSABLE_LIMIT),
        _ => None,
    }
}

/// Ceiling for a BSD/macOS filesystem type name, `None` when unknown.
pub fn limit_for_fs_name(name: &str) -> Option<u64> {
    match name {
        "msdos" | "vfat" | "fat" | "fat32" => Some(FAT_MAX_FILE_SIZE),
        "apfs" | "hfs" | "ufs" | "zfs" | "exfat" | "ntfs" | "ext4" | "xfs" | "btrfs" | "tmpfs" => {
            Some(ADDRESSABLE_LIMIT)
        }
        _ => None,
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn statfs(path: &Path) -> Option<libc::statfs> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).ok()?;
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &raw mut stat) } != 0 {
        return None;
    }
    Some(stat)
}

#[cfg(target_os = "linux")]
fn query_limit(path: &Path) -> Option<u64> {
    let stat = statfs(path)?;
    #[allow(clippy::cast_sign_loss, clippy::unnecessary_cast)]
    let fs_type = stat.f_type as u64;
    debug!("Filesystem type of {} is {:#x}", path.display(), fs_type);
    limit_for_fs_type(fs_type)
}

#[cfg(all(unix, not(target_os = "linux")))]
#[allow(unsafe_code)]
fn query_limit(path: &Path) -> Option<u64> {
    let stat = statfs(path)?;
    let name = unsafe { std::ffi::CStr::from_ptr(stat.f_fstypename.as_ptr()) }
        .to_string_lossy()
        .to_string();
    debug!("Filesystem type of {} is {}", path.display(), name);
    limit_for_fs_name(&name)
}

#[cfg(not(unix))]
fn query_limit(_path: &Path) -> Option<u64> {
    None
}

/// Largest size a container under `path` may grow to.
///
/// Falls back to [`DEFAULT_MAX_CONTAINER_SIZE`] with a warning when the
/// filesystem cannot be queried or is not recognised.
pub fn detect_max_container_size(path: &Path) -> u64 {
    if let Some(limit) = query_limit(path) {
        debug!("Container size limit for {}: {} bytes", path.display(), limit);
        return limit;
    }

    warn!(
        "Unsupported or unknown filesystem at {}, limiting containers to {} bytes",
        path.display(),
        DEFAULT_MAX_CONTAINER_SIZE
    );
    DEFAULT_MAX_CONTAINER_SIZE
}
