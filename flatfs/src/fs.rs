use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::alloc::{Bitmap, State};
use crate::chain::{ChainError, ExtentPool};
use crate::io::{BlockNumber, BlockStorage};
use crate::table::{validate_name, FileRecord, FileTable};

use thiserror::Error;

/// Table size of the reference deployment.
pub const DEFAULT_MAX_FILES: usize = 5;
/// Block 0 is kept out of allocation.
pub const DEFAULT_RESERVED_BLOCKS: usize = 1;

/// How `read` holds the volume lock while it transfers block contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The shared lock is held for the lookup and the block I/O. Writers of the
    /// same file wait until the read has finished.
    Strict,
    /// The block list is copied under the shared lock and read after it is
    /// released. A concurrent write or delete of the same file can recycle
    /// those blocks mid-read, in which case the returned bytes are garbage.
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Number of slots in the file table.
    pub max_files: usize,
    /// Leading blocks that are never allocated.
    pub reserved_blocks: usize,
    pub read_mode: ReadMode,
    /// Zero blocks on disk before returning them to the bitmap.
    pub scrub_on_release: bool,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            reserved_blocks: DEFAULT_RESERVED_BLOCKS,
            read_mode: ReadMode::Strict,
            scrub_on_release: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("file already exists: {0}")]
    DuplicateFile(String),
    #[error("max files reached ({0})")]
    TableFull(usize),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("insufficient space: {needed} blocks needed, {free} free")]
    InsufficientSpace { needed: usize, free: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("disk I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("file system lock poisoned")]
    LockPoisoned,
    #[error("volume corrupted: {0}")]
    Corrupted(String),
}

impl From<ChainError> for FsError {
    fn from(err: ChainError) -> Self {
        FsError::Corrupted(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub name: String,
    pub size: usize,
    /// Number of data blocks backing the file.
    pub blocks: usize,
}

/// Every piece of in-memory metadata. Guarded as one unit so the ownership
/// invariants between table, bitmap and chains hold whenever the lock is free.
#[derive(Debug, Clone, PartialEq)]
struct Volume {
    table: FileTable,
    bitmap: Bitmap,
    extents: ExtentPool,
}

/// Blocks needed to hold `len` bytes.
fn blocks_for(len: usize, block_size: usize) -> usize {
    (len + block_size - 1) / block_size
}

/// A flat, single-level file store over a region of fixed-size blocks.
///
/// # Layout
/// ======================================================
/// | Reserved blocks | Data blocks (chained per file)   |
/// ======================================================
///
/// Metadata lives in memory only; a fresh manager always starts empty. The
/// manager is `Sync` and meant to be shared behind an `Arc` by all callers.
pub struct StorageManager<T: BlockStorage> {
    dev: T,
    block_size: usize,
    options: FsOptions,
    volume: RwLock<Volume>,
}

impl<T: BlockStorage> StorageManager<T> {
    /// Builds an empty file system over `dev`. The region geometry comes from
    /// the device.
    pub fn new(dev: T, options: FsOptions) -> Result<Self> {
        let block_size = dev.block_size();
        let block_count = dev.block_count();
        if block_size == 0 {
            return Err(FsError::InvalidArgument(
                "block size must be non-zero".to_string(),
            ));
        }
        if options.max_files == 0 {
            return Err(FsError::InvalidArgument(
                "max_files must be at least 1".to_string(),
            ));
        }
        if options.reserved_blocks >= block_count {
            return Err(FsError::InvalidArgument(format!(
                "{} reserved blocks leave no data blocks out of {}",
                options.reserved_blocks, block_count
            )));
        }

        info!(
            "Initializing volume: {} blocks of {} bytes, {} reserved, {} file slots.",
            block_count, block_size, options.reserved_blocks, options.max_files
        );
        let volume = Volume {
            table: FileTable::new(options.max_files),
            bitmap: Bitmap::new(block_count, options.reserved_blocks),
            extents: ExtentPool::new(block_count),
        };
        Ok(Self {
            dev,
            block_size,
            options,
            volume: RwLock::new(volume),
        })
    }

    pub fn device(&self) -> &T {
        &self.dev
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    /// Registers an empty file.
    pub fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut vol = self.write_volume()?;
        let slot = vol.table.insert(FileRecord::empty(name))?;
        info!("Created \"{}\" in slot {}.", name, slot);
        Ok(())
    }

    /// Removes the file and returns its blocks to the free pool, zeroing them
    /// first unless scrubbing is disabled.
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut vol = self.write_volume()?;
        let head = match vol.table.find(name) {
            Some(record) => record.head,
            None => return Err(FsError::FileNotFound(name.to_string())),
        };

        let blocks = vol.extents.release(head);
        self.release_blocks(&mut vol, &blocks);
        vol.table.remove(name);
        info!("Deleted \"{}\", freed {} blocks.", name, blocks.len());
        Ok(())
    }

    /// Replaces the contents of an existing file.
    ///
    /// The payload always goes to freshly allocated blocks. The record only
    /// switches to them once every block is on disk, so a failed write leaves
    /// the previous contents readable and frees whatever it had allocated.
    pub fn write(&self, name: &str, payload: &[u8]) -> Result<()> {
        validate_name(name)?;
        let mut vol = self.write_volume()?;
        if vol.table.find(name).is_none() {
            return Err(FsError::FileNotFound(name.to_string()));
        }

        let needed = blocks_for(payload.len(), self.block_size);
        let free = vol.bitmap.free_count();
        let blocks = vol
            .bitmap
            .allocate(needed)
            .ok_or(FsError::InsufficientSpace { needed, free })?;
        debug!("Allocated blocks {:?} for \"{}\".", blocks, name);

        if let Err(err) = self.write_payload(&blocks, payload) {
            warn!(
                "Write to \"{}\" failed, rolling back {} new blocks: {}",
                name,
                blocks.len(),
                err
            );
            self.release_blocks(&mut vol, &blocks);
            return Err(err.into());
        }

        let head = vol.extents.build(&blocks);
        let old_head = match vol.table.find_mut(name) {
            Some(record) => {
                record.size = payload.len();
                std::mem::replace(&mut record.head, head)
            }
            None => unreachable!("record \"{}\" vanished under the exclusive lock", name),
        };
        let old_blocks = vol.extents.release(old_head);
        self.release_blocks(&mut vol, &old_blocks);

        info!(
            "Wrote {} bytes to \"{}\" across {} blocks.",
            payload.len(),
            name,
            blocks.len()
        );
        Ok(())
    }

    /// Returns the full contents of the file.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let vol = self.read_volume()?;
        let (head, size) = match vol.table.find(name) {
            Some(record) => (record.head, record.size),
            None => return Err(FsError::FileNotFound(name.to_string())),
        };
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut content = Vec::with_capacity(size);
        match self.options.read_mode {
            ReadMode::Strict => {
                vol.extents.read_into(
                    head,
                    size,
                    self.block_size,
                    |blocknr, buf| self.dev.read_block(blocknr, buf).map_err(FsError::from),
                    &mut content,
                )?;
            }
            ReadMode::Relaxed => {
                let blocks = vol.extents.blocks(head)?;
                drop(vol);
                self.read_blocks(&blocks, size, &mut content)?;
            }
        }
        Ok(content)
    }

    /// Active file names in table order.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_volume()?.table.list_names())
    }

    pub fn stat(&self, name: &str) -> Result<FileStat> {
        validate_name(name)?;
        let vol = self.read_volume()?;
        let record = vol
            .table
            .find(name)
            .ok_or_else(|| FsError::FileNotFound(name.to_string()))?;
        Ok(FileStat {
            name: record.name.clone(),
            size: record.size,
            blocks: blocks_for(record.size, self.block_size),
        })
    }

    /// Number of blocks currently available for allocation.
    pub fn free_blocks(&self) -> Result<usize> {
        Ok(self.read_volume()?.bitmap.free_count())
    }

    /// Audits block ownership across the table, chains and bitmap.
    pub fn check(&self) -> Result<()> {
        let vol = self.read_volume()?;
        let block_count = vol.bitmap.len();
        let reserved = vol.bitmap.reserved();
        let mut owner: Vec<Option<&str>> = vec![None; block_count];
        let mut used = 0;

        for record in vol.table.records() {
            let blocks = vol.extents.blocks(record.head)?;
            let expected = blocks_for(record.size, self.block_size);
            if blocks.len() != expected {
                return Err(FsError::Corrupted(format!(
                    "\"{}\" is {} bytes but chains {} blocks, expected {}",
                    record.name,
                    record.size,
                    blocks.len(),
                    expected
                )));
            }
            for blocknr in blocks {
                if blocknr < reserved || blocknr >= block_count {
                    return Err(FsError::Corrupted(format!(
                        "\"{}\" owns block {} outside the data region",
                        record.name, blocknr
                    )));
                }
                if vol.bitmap.get(blocknr) == State::Free {
                    return Err(FsError::Corrupted(format!(
                        "block {} of \"{}\" is marked free",
                        blocknr, record.name
                    )));
                }
                if let Some(other) = owner[blocknr] {
                    return Err(FsError::Corrupted(format!(
                        "block {} is shared by \"{}\" and \"{}\"",
                        blocknr, other, record.name
                    )));
                }
                owner[blocknr] = Some(record.name.as_str());
                used += 1;
            }
        }

        if vol.bitmap.free_count() + used + reserved != block_count {
            return Err(FsError::Corrupted(format!(
                "{} free + {} used + {} reserved blocks does not add up to {}",
                vol.bitmap.free_count(),
                used,
                reserved,
                block_count
            )));
        }
        if vol.extents.in_use() != used {
            return Err(FsError::Corrupted(format!(
                "{} extent nodes linked but only {} reachable from files",
                vol.extents.in_use(),
                used
            )));
        }
        Ok(())
    }

    fn read_volume(&self) -> Result<RwLockReadGuard<'_, Volume>> {
        self.volume.read().map_err(|_| FsError::LockPoisoned)
    }

    fn write_volume(&self) -> Result<RwLockWriteGuard<'_, Volume>> {
        self.volume.write().map_err(|_| FsError::LockPoisoned)
    }

    /// Writes the payload over `blocks` in order, zero padding the last one.
    fn write_payload(&self, blocks: &[BlockNumber], payload: &[u8]) -> std::io::Result<()> {
        let mut block_buffer = vec![0; self.block_size];
        for (&blocknr, chunk) in blocks.iter().zip(payload.chunks(self.block_size)) {
            block_buffer[..chunk.len()].copy_from_slice(chunk);
            for b in block_buffer[chunk.len()..].iter_mut() {
                *b = 0;
            }
            self.dev.write_block(blocknr, &block_buffer)?;
        }
        Ok(())
    }

    fn read_blocks(
        &self,
        blocks: &[BlockNumber],
        size: usize,
        content: &mut Vec<u8>,
    ) -> std::io::Result<()> {
        let mut block_buffer = vec![0; self.block_size];
        let mut remaining = size;
        for &blocknr in blocks {
            if remaining == 0 {
                break;
            }
            self.dev.read_block(blocknr, &mut block_buffer)?;
            let take = std::cmp::min(remaining, self.block_size);
            content.extend_from_slice(&block_buffer[..take]);
            remaining -= take;
        }
        Ok(())
    }

    /// Zeroes (when enabled) and frees blocks that no chain references any
    /// more. Scrub failures are logged; the blocks are freed regardless since
    /// the next write to them overwrites every byte.
    fn release_blocks(&self, vol: &mut Volume, blocks: &[BlockNumber]) {
        if self.options.scrub_on_release {
            let zeroes = vec![0; self.block_size];
            for &blocknr in blocks {
                if let Err(err) = self.dev.write_block(blocknr, &zeroes) {
                    error!("Failed to scrub released block {}: {}", blocknr, err);
                }
            }
        }
        vol.bitmap.release(blocks);
        debug!("Released blocks {:?}.", blocks);
    }
}
