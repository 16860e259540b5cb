//! Async read/write surface over the container files
//!
//! Every operation holds one store-wide lock from its first seek to its
//! last write, so two operations never interleave their I/O, even across
//! categories. Composite operations ([`DatStore::copy_record`],
//! [`DatStore::import_file`]) run all their steps under a single
//! acquisition.

use crate::ledger::{EmptyLedger, ModLedger, ModList, OffsetIndex};
use crate::storage::{ContainerManager, aligned_size};
use crate::{DataCategory, DatConfig, Result, StorageError, WRITE_ALIGNMENT};
use sqpack_formats::{
    DatOffset, FIRST_RECORD_OFFSET, FormatError, GenericRecord, MeshRecord, RecordFormat,
    RecordType, TextureRecord, compressed_record_size, peek_record_type,
};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Data store for one game data directory
///
/// Reads decode records from any container. Writes only ever land in
/// modded containers; the space allocator picks the position from the
/// occupied ranges the [`ModLedger`] reports.
pub struct DatStore {
    /// Container files, behind the store-wide lock
    manager: Mutex<ContainerManager>,
    /// Occupied ranges for writes that don't bring their own ledger
    ledger: Arc<dyn ModLedger>,
    /// Delay before retrying a failed write
    retry_delay: Duration,
}

impl std::fmt::Debug for DatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatStore")
            .field("manager", &self.manager)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// Windows sharing and lock violations (`ERROR_SHARING_VIOLATION`,
/// `ERROR_LOCK_VIOLATION`), raised while another process holds the file.
const WINDOWS_SHARING_ERRORS: [i32; 2] = [32, 33];

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::PermissionDenied | ErrorKind::WouldBlock
    ) || (cfg!(windows)
        && error
            .raw_os_error()
            .is_some_and(|code| WINDOWS_SHARING_ERRORS.contains(&code)))
}

fn locate(offset: DatOffset) -> Result<(u8, u64)> {
    if offset.is_absent() {
        return Err(StorageError::MissingOffset);
    }
    Ok(offset.unpack()?)
}

impl DatStore {
    /// Open the data directory named in `config`; writes always append.
    pub fn open(config: DatConfig) -> Result<Self> {
        Self::with_ledger(config, Arc::new(EmptyLedger))
    }

    /// Open the data directory named in `config`, placing writes around
    /// the ranges `ledger` reports.
    pub fn with_ledger(config: DatConfig, ledger: Arc<dyn ModLedger>) -> Result<Self> {
        let manager = ContainerManager::new(&config)?;
        info!("Opened data store at {}", manager.base_path().display());
        Ok(Self {
            manager: Mutex::new(manager),
            ledger,
            retry_delay: config.write_retry_delay(),
        })
    }

    /// Whether container `number` of `category` shipped with the game.
    pub async fn is_original(&self, category: DataCategory, number: u8) -> Result<bool> {
        self.manager.lock().await.is_original(category, number)
    }

    /// Modded container numbers of `category`, ascending.
    pub async fn modded_containers(&self, category: DataCategory) -> Result<Vec<u8>> {
        self.manager.lock().await.modded_containers(category)
    }

    /// Per-container size ceiling in effect.
    pub async fn max_container_size(&self) -> u64 {
        self.manager.lock().await.max_container_size()
    }

    /// Read and decode a generic record, returning its payload.
    pub async fn read_generic(&self, category: DataCategory, offset: DatOffset) -> Result<Vec<u8>> {
        let record: GenericRecord = self.read_record(category, offset).await?;
        Ok(record.into_inner())
    }

    /// Read and decode a mesh record.
    pub async fn read_mesh(&self, category: DataCategory, offset: DatOffset) -> Result<MeshRecord> {
        self.read_record(category, offset).await
    }

    /// Read and decode a texture record.
    pub async fn read_texture(
        &self,
        category: DataCategory,
        offset: DatOffset,
    ) -> Result<TextureRecord> {
        self.read_record(category, offset).await
    }

    /// Read and decode a record of any type.
    pub async fn read_record<T: RecordFormat>(
        &self,
        category: DataCategory,
        offset: DatOffset,
    ) -> Result<T> {
        let (number, position) = locate(offset)?;
        let manager = self.manager.lock().await;
        debug!(
            "Reading {:?} record at {} of {}",
            T::RECORD_TYPE,
            position,
            category.container_file_name(number)
        );
        let mut reader = manager.open_reader(category, number)?;
        Ok(T::decode(&mut reader, position)?)
    }

    /// On-disk footprint of the record at `offset`, without decoding it.
    pub async fn compressed_record_size(
        &self,
        category: DataCategory,
        offset: DatOffset,
    ) -> Result<u64> {
        let (number, position) = locate(offset)?;
        let manager = self.manager.lock().await;
        let mut reader = manager.open_reader(category, number)?;
        Ok(compressed_record_size(&mut reader, position)?)
    }

    /// The stored bytes of the record at `offset`, exactly as on disk.
    pub async fn read_raw_record(
        &self,
        category: DataCategory,
        offset: DatOffset,
    ) -> Result<Vec<u8>> {
        let manager = self.manager.lock().await;
        Self::read_raw_locked(&manager, category, offset)
    }

    /// Write an encoded record, returning its new offset.
    ///
    /// `preferred` is honoured only when it names a 256-byte aligned
    /// position in an existing modded container that keeps the container
    /// within its size ceiling, and the record fits the room at that
    /// position without reaching a neighbour. Otherwise the allocator
    /// decides. The record is zero-padded to a multiple of 256 bytes.
    pub async fn write_record(
        &self,
        category: DataCategory,
        bytes: &[u8],
        preferred: Option<DatOffset>,
    ) -> Result<DatOffset> {
        self.write_record_with_ledger(category, bytes, preferred, self.ledger.as_ref())
            .await
    }

    /// [`Self::write_record`] against a caller-held ledger, for batches
    /// that keep their modlist in memory until they are done.
    pub async fn write_record_with_ledger<L: ModLedger + ?Sized>(
        &self,
        category: DataCategory,
        bytes: &[u8],
        preferred: Option<DatOffset>,
        ledger: &L,
    ) -> Result<DatOffset> {
        let manager = self.manager.lock().await;
        self.write_locked(&manager, category, bytes, preferred, ledger)
            .await
    }

    /// Encode and write a generic payload.
    pub async fn write_generic(
        &self,
        category: DataCategory,
        record: &GenericRecord,
        preferred: Option<DatOffset>,
    ) -> Result<DatOffset> {
        self.write_record(category, &record.to_bytes()?, preferred)
            .await
    }

    /// Encode and write a mesh.
    pub async fn write_mesh(
        &self,
        category: DataCategory,
        record: &MeshRecord,
        preferred: Option<DatOffset>,
    ) -> Result<DatOffset> {
        self.write_record(category, &record.to_bytes()?, preferred)
            .await
    }

    /// Encode and write a texture.
    pub async fn write_texture(
        &self,
        category: DataCategory,
        record: &TextureRecord,
        preferred: Option<DatOffset>,
    ) -> Result<DatOffset> {
        self.write_record(category, &record.to_bytes()?, preferred)
            .await
    }

    /// Copy the stored bytes of a record into `destination`, without
    /// recompressing them.
    pub async fn copy_record(
        &self,
        source_category: DataCategory,
        source_offset: DatOffset,
        destination: DataCategory,
    ) -> Result<DatOffset> {
        let manager = self.manager.lock().await;
        let raw = Self::read_raw_locked(&manager, source_category, source_offset)?;
        let offset = self
            .write_locked(&manager, destination, &raw, None, self.ledger.as_ref())
            .await?;
        info!(
            "Copied record {} of {} to {} of {}",
            source_offset, source_category, offset, destination
        );
        Ok(offset)
    }

    /// Write `bytes` as the new content of game file `path`, then point
    /// `index` at it and record it in `modlist`.
    ///
    /// The file's previous modded slot is reused when the new record fits
    /// into it. Nothing is persisted; the caller saves `index` and
    /// `modlist` when its batch is complete.
    pub async fn import_file<I: OffsetIndex + ?Sized>(
        &self,
        path: &str,
        category: DataCategory,
        bytes: &[u8],
        index: &mut I,
        modlist: &mut ModList,
    ) -> Result<DatOffset> {
        let manager = self.manager.lock().await;

        let size = aligned_size(bytes.len() as u64);
        let current = index.get_offset(path);
        let preferred = modlist
            .entry(path)
            .filter(|entry| {
                entry.category == category
                    && !entry.modded().is_absent()
                    && size <= entry.modded_size
            })
            .map(|entry| entry.modded());

        let offset = self
            .write_locked(&manager, category, bytes, preferred, &*modlist)
            .await?;

        modlist.record_write(path, category, offset, size, current);
        index.set_offset(path, offset);
        info!("Imported {} at {}", path, offset);
        Ok(offset)
    }

    fn read_raw_locked(
        manager: &ContainerManager,
        category: DataCategory,
        offset: DatOffset,
    ) -> Result<Vec<u8>> {
        let (number, position) = locate(offset)?;
        let mut reader = manager.open_reader(category, number)?;
        let size = compressed_record_size(&mut reader, position)?;
        let len = usize::try_from(size).map_err(|_| {
            FormatError::InvalidHeader(format!("record of {size} bytes does not fit in memory"))
        })?;

        reader.seek(SeekFrom::Start(position))?;
        let mut raw = vec![0u8; len];
        reader.read_exact(&mut raw)?;
        Ok(raw)
    }

    /// The preferred position, if a write may go there.
    ///
    /// Besides alignment and the size ceiling, the record must fit the room
    /// already at `offset`: the ledger's reservation there, or the footprint
    /// of the record stored there. Past the last record the file simply
    /// grows. Nothing the ledger lists elsewhere may be overlapped.
    fn usable_preferred<L: ModLedger + ?Sized>(
        manager: &ContainerManager,
        category: DataCategory,
        offset: DatOffset,
        len: u64,
        ledger: &L,
    ) -> Result<Option<(u8, u64)>> {
        if offset.is_absent() {
            return Ok(None);
        }
        let Ok((number, position)) = offset.unpack() else {
            debug!("Ignoring preferred offset {}: not a valid offset", offset);
            return Ok(None);
        };
        let file_name = category.container_file_name(number);

        let usable = position % WRITE_ALIGNMENT == 0
            && position >= FIRST_RECORD_OFFSET
            && manager.is_modded(category, number)?
            && position + len <= manager.max_container_size();
        if !usable {
            debug!("Ignoring preferred offset {} in {}", offset, file_name);
            return Ok(None);
        }

        let end = position + len;
        let occupied = ledger.occupied_ranges(category, number);
        if let Some(clash) = occupied.iter().find(|range| {
            range.start != position && range.start < end && position < aligned_size(range.end())
        }) {
            debug!(
                "Ignoring preferred offset {} in {}: {} bytes would reach the record at {}",
                offset, file_name, len, clash.start
            );
            return Ok(None);
        }

        let reserved = occupied
            .iter()
            .filter(|range| range.start == position)
            .map(|range| aligned_size(range.end()) - position)
            .max()
            .unwrap_or(0);
        let file_end = aligned_size(manager.container_size(category, number)?);
        if len <= reserved || position >= file_end {
            return Ok(Some((number, position)));
        }

        let mut reader = manager.open_reader(category, number)?;
        let room = match compressed_record_size(&mut reader, position) {
            Ok(size) => aligned_size(size).max(reserved),
            Err(e) => {
                debug!(
                    "Ignoring preferred offset {} in {}: no record there ({})",
                    offset, file_name, e
                );
                return Ok(None);
            }
        };
        // The last record may grow into the end of the file
        if len > room && position + room < file_end {
            debug!(
                "Ignoring preferred offset {} in {}: {} bytes exceed the {} there",
                offset, file_name, len, room
            );
            return Ok(None);
        }
        Ok(Some((number, position)))
    }

    async fn write_locked<L: ModLedger + ?Sized>(
        &self,
        manager: &ContainerManager,
        category: DataCategory,
        bytes: &[u8],
        preferred: Option<DatOffset>,
        ledger: &L,
    ) -> Result<DatOffset> {
        let record_type = record_type_of(bytes)?;

        let mut padded = bytes.to_vec();
        padded.resize(aligned_size(bytes.len() as u64) as usize, 0);
        let len = padded.len() as u64;

        let preferred = match preferred {
            Some(offset) => Self::usable_preferred(manager, category, offset, len, ledger)?,
            None => None,
        };
        let (number, position) = match preferred {
            Some(target) => target,
            None => {
                let target = manager.select_write_target(category, len, ledger)?;
                (target.container, target.placement.position())
            }
        };

        self.write_with_retry(manager, category, number, position, &padded)
            .await?;

        let offset = DatOffset::pack(number, position)?;
        debug!(
            "Wrote {:?} record ({} bytes) at {} of {}",
            record_type,
            len,
            position,
            category.container_file_name(number)
        );
        Ok(offset)
    }

    async fn write_with_retry(
        &self,
        manager: &ContainerManager,
        category: DataCategory,
        number: u8,
        position: u64,
        data: &[u8],
    ) -> Result<()> {
        let file_name = category.container_file_name(number);
        retry_transient(self.retry_delay, &file_name, || {
            manager.write_at(category, number, position, data)
        })
        .await
    }
}

/// Run `write`, running it once more after `delay` when it fails with an
/// error another process may clear by then.
async fn retry_transient<F>(delay: Duration, target: &str, mut write: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    match write() {
        Err(StorageError::Io(e)) if is_transient(&e) => {
            warn!("Write to {} failed ({}), retrying in {:?}", target, e, delay);
            tokio::time::sleep(delay).await;
            write()
        }
        other => other,
    }
}

/// Record type tag of encoded bytes.
fn record_type_of(bytes: &[u8]) -> Result<RecordType> {
    match peek_record_type(bytes) {
        Ok(record_type) => Ok(record_type),
        Err(FormatError::InvalidRecordType(tag)) => Err(StorageError::InvalidRecordType(tag)),
        Err(e) => Err(e.into()),
    }
}
