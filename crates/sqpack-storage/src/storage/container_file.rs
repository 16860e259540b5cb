//! Container (`.win32.datN`) file management
//!
//! Handles are opened per call and closed when the call returns; the only
//! state kept between calls is the original/modded classification.

use crate::category::parse_container_file_name;
use crate::config::DatConfig;
use crate::storage::fs_limit::detect_max_container_size;
use crate::{DataCategory, Result, StorageError};
use dashmap::DashMap;
use sqpack_formats::container_header::{MODDED_SENTINEL_OFFSET, is_sentinel_pair};
use sqpack_formats::{FIRST_RECORD_OFFSET, MAX_CONTAINER_NUMBER, modded_container_prologue};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Container file manager for one game data directory
#[derive(Debug)]
pub struct ContainerManager {
    /// Directory holding the container files
    base_path: PathBuf,
    /// Per-container size ceiling
    max_container_size: u64,
    /// Classification of existing containers, never invalidated
    originals: DashMap<(DataCategory, u8), bool>,
}

impl ContainerManager {
    /// Create a manager for the directory named in `config`.
    ///
    /// The directory is created when missing. The size ceiling comes from
    /// the configuration, else from the filesystem.
    pub fn new(config: &DatConfig) -> Result<Self> {
        let base_path = config.base_path.clone();
        if !base_path.exists() {
            info!("Creating data directory: {}", base_path.display());
            std::fs::create_dir_all(&base_path)?;
        }

        let max_container_size = config
            .max_container_size
            .unwrap_or_else(|| detect_max_container_size(&base_path));
        debug!(
            "Container manager at {} (max container size {} bytes)",
            base_path.display(),
            max_container_size
        );

        Ok(Self {
            base_path,
            max_container_size,
            originals: DashMap::new(),
        })
    }

    /// Directory holding the container files.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Largest size a container may grow to.
    pub const fn max_container_size(&self) -> u64 {
        self.max_container_size
    }

    /// Path of container `number` of `category`.
    pub fn container_path(&self, category: DataCategory, number: u8) -> PathBuf {
        self.base_path.join(category.container_file_name(number))
    }

    /// Whether container `number` of `category` exists on disk.
    pub fn exists(&self, category: DataCategory, number: u8) -> bool {
        number <= MAX_CONTAINER_NUMBER && self.container_path(category, number).is_file()
    }

    /// Whether the container shipped with the game.
    ///
    /// A container is original when it exists and lacks the modded sentinel
    /// pair. Missing containers are not original and are not cached, so a
    /// container created later classifies correctly.
    pub fn is_original(&self, category: DataCategory, number: u8) -> Result<bool> {
        if let Some(cached) = self.originals.get(&(category, number)) {
            return Ok(*cached);
        }
        if !self.exists(category, number) {
            return Ok(false);
        }

        let mut file = File::open(self.container_path(category, number))?;
        file.seek(SeekFrom::Start(MODDED_SENTINEL_OFFSET))?;
        let mut sentinel = [0u8; 8];
        let original = match file.read_exact(&mut sentinel) {
            Ok(()) => !is_sentinel_pair(&sentinel),
            // Too short to carry a header; certainly not ours
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => true,
            Err(e) => return Err(e.into()),
        };

        debug!(
            "Classified {} as {}",
            category.container_file_name(number),
            if original { "original" } else { "modded" }
        );
        self.originals.insert((category, number), original);
        Ok(original)
    }

    /// Whether the container exists and was created by this crate.
    pub fn is_modded(&self, category: DataCategory, number: u8) -> Result<bool> {
        Ok(self.exists(category, number) && !self.is_original(category, number)?)
    }

    /// Container numbers of `category` present on disk, ascending.
    pub fn existing_containers(&self, category: DataCategory) -> Vec<u8> {
        (0..=MAX_CONTAINER_NUMBER)
            .filter(|&number| self.exists(category, number))
            .collect()
    }

    /// Highest container number of `category` present on disk.
    pub fn largest_existing_number(&self, category: DataCategory) -> Option<u8> {
        (0..=MAX_CONTAINER_NUMBER)
            .rev()
            .find(|&number| self.exists(category, number))
    }

    /// Modded container numbers of `category`, ascending.
    pub fn modded_containers(&self, category: DataCategory) -> Result<Vec<u8>> {
        let mut modded = Vec::new();
        for number in self.existing_containers(category) {
            if !self.is_original(category, number)? {
                modded.push(number);
            }
        }
        Ok(modded)
    }

    /// Every container file in the directory, by category.
    pub fn scan(&self) -> Result<Vec<(DataCategory, u8)>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if let Some(parsed) = entry.file_name().to_str().and_then(parse_container_file_name) {
                found.push(parsed);
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// Create the next modded container of `category` and return its number.
    ///
    /// Writes both 1024-byte header blocks. Fails once number 7 is taken.
    pub fn create_container(&self, category: DataCategory) -> Result<u8> {
        let number = match self.largest_existing_number(category) {
            None => 0,
            Some(largest) if largest < MAX_CONTAINER_NUMBER => largest + 1,
            Some(_) => return Err(StorageError::ContainerExhausted { category }),
        };

        let path = self.container_path(category, number);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&modded_container_prologue()?)?;
        file.flush()?;

        self.originals.insert((category, number), false);
        info!("Created container {}", path.display());
        Ok(number)
    }

    /// Current size of a container in bytes.
    pub fn container_size(&self, category: DataCategory, number: u8) -> Result<u64> {
        let path = self.container_path(category, number);
        std::fs::metadata(&path)
            .map(|metadata| metadata.len())
            .map_err(|e| StorageError::InvalidContainer {
                category,
                number,
                reason: format!("{}: {e}", path.display()),
            })
    }

    /// Open a container read-only.
    pub fn open_reader(&self, category: DataCategory, number: u8) -> Result<BufReader<File>> {
        let path = self.container_path(category, number);
        let file = File::open(&path).map_err(|e| StorageError::InvalidContainer {
            category,
            number,
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(BufReader::new(file))
    }

    /// Read `len` bytes at `position`.
    pub fn read_at(
        &self,
        category: DataCategory,
        number: u8,
        position: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(category, number)?;
        reader.seek(SeekFrom::Start(position))?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Write `data` at `position` of a modded container.
    ///
    /// Original containers, and the header blocks of modded ones, are refused.
    pub fn write_at(
        &self,
        category: DataCategory,
        number: u8,
        position: u64,
        data: &[u8],
    ) -> Result<()> {
        if !self.is_modded(category, number)? {
            return Err(StorageError::InvalidContainer {
                category,
                number,
                reason: "not a modded container".to_string(),
            });
        }
        if position < FIRST_RECORD_OFFSET {
            return Err(StorageError::InvalidContainer {
                category,
                number,
                reason: format!("write at {position} would overwrite the container headers"),
            });
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.container_path(category, number))?;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use sqpack_formats::container_header::{ArchiveHeader, HEADER_BLOCK_SIZE};
    use tempfile::{TempDir, tempdir};

    fn manager() -> (TempDir, ContainerManager) {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = DatConfig::new(dir.path()).with_max_container_size(1 << 20);
        let manager = ContainerManager::new(&config).expect("manager");
        (dir, manager)
    }

    fn write_original(manager: &ContainerManager, category: DataCategory, number: u8) {
        let archive = ArchiveHeader {
            sentinel_a: 0,
            sentinel_b: 0,
            ..ArchiveHeader::modded()
        };
        let mut bytes = archive.to_bytes().unwrap().to_vec();
        bytes.resize(4 * HEADER_BLOCK_SIZE, 0);
        std::fs::write(manager.container_path(category, number), bytes).unwrap();
    }

    #[test]
    fn test_create_numbers_sequentially() {
        let (_dir, manager) = manager();
        assert_eq!(manager.largest_existing_number(DataCategory::Ui), None);

        assert_eq!(manager.create_container(DataCategory::Ui).unwrap(), 0);
        assert_eq!(manager.create_container(DataCategory::Ui).unwrap(), 1);
        assert_eq!(manager.largest_existing_number(DataCategory::Ui), Some(1));
        assert_eq!(manager.container_size(DataCategory::Ui, 1).unwrap(), 2048);
        assert!(manager.is_modded(DataCategory::Ui, 1).unwrap());

        let path = manager.container_path(DataCategory::Ui, 0);
        assert!(path.ends_with("060000.win32.dat0"));
    }

    #[test]
    fn test_create_after_originals() {
        let (_dir, manager) = manager();
        write_original(&manager, DataCategory::Chara, 0);
        write_original(&manager, DataCategory::Chara, 1);

        assert!(manager.is_original(DataCategory::Chara, 0).unwrap());
        assert_eq!(manager.create_container(DataCategory::Chara).unwrap(), 2);
        assert_eq!(manager.modded_containers(DataCategory::Chara).unwrap(), vec![2]);
    }

    #[test]
    fn test_exhaustion_after_seven() {
        let (_dir, manager) = manager();
        for expected in 0..=7 {
            assert_eq!(manager.create_container(DataCategory::Bg).unwrap(), expected);
        }
        assert!(matches!(
            manager.create_container(DataCategory::Bg),
            Err(StorageError::ContainerExhausted {
                category: DataCategory::Bg
            })
        ));
    }

    #[test]
    fn test_missing_container_not_cached() {
        let (_dir, manager) = manager();
        assert!(!manager.is_original(DataCategory::Exd, 0).unwrap());
        manager.create_container(DataCategory::Exd).unwrap();
        assert!(!manager.is_original(DataCategory::Exd, 0).unwrap());
        assert!(manager.is_modded(DataCategory::Exd, 0).unwrap());
    }

    #[test]
    fn test_short_file_is_original() {
        let (_dir, manager) = manager();
        std::fs::write(manager.container_path(DataCategory::Vfx, 0), b"tiny").unwrap();
        assert!(manager.is_original(DataCategory::Vfx, 0).unwrap());
    }

    #[test]
    fn test_write_refuses_original_and_headers() {
        let (_dir, manager) = manager();
        write_original(&manager, DataCategory::Sound, 0);
        let before = std::fs::read(manager.container_path(DataCategory::Sound, 0)).unwrap();

        assert!(manager.write_at(DataCategory::Sound, 0, 2048, &[1; 256]).is_err());
        let after = std::fs::read(manager.container_path(DataCategory::Sound, 0)).unwrap();
        assert_eq!(before, after);

        let number = manager.create_container(DataCategory::Sound).unwrap();
        assert!(manager.write_at(DataCategory::Sound, number, 0, &[1; 256]).is_err());
        manager
            .write_at(DataCategory::Sound, number, 2048, &[1; 256])
            .expect("write");
        assert_eq!(
            manager.read_at(DataCategory::Sound, number, 2048, 4).unwrap(),
            vec![1; 4]
        );
    }

    #[test]
    fn test_scan() {
        let (dir, manager) = manager();
        manager.create_container(DataCategory::Music).unwrap();
        manager.create_container(DataCategory::Common).unwrap();
        std::fs::write(dir.path().join("000000.win32.index"), b"").unwrap();

        assert_eq!(
            manager.scan().unwrap(),
            vec![(DataCategory::Common, 0), (DataCategory::Music, 0)]
        );
    }
}
