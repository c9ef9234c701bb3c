use crate::io::block::{BlockNumber, BlockStorage};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Small blocks keep the emulated region compact; a handful of them is enough
/// to exercise multi-block files.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    /// Every access seeks first, so the handle is held for the whole seek + transfer.
    fd: Mutex<File>,
    /// The total number of blocks available in the file store.
    block_count: usize,
    block_size: usize,
}

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        match self.fd.into_inner() {
            Ok(fd) => fd,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn file(&self) -> std::io::Result<MutexGuard<'_, File>> {
        self.fd
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "disk handle poisoned"))
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        Ok(())
    }

    fn offset(&self, blocknr: BlockNumber) -> u64 {
        (blocknr * self.block_size) as u64
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize, block_size: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        FileBlockEmulatorBuilder::from(file)
            .with_block_count(nblocks)
            .with_block_size(block_size)
            .clear_medium(false)
            .build()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }

        let mut fd = self.file()?;
        fd.seek(SeekFrom::Start(self.offset(blocknr)))?;
        // Limit the read to just the block specified.
        fd.read_exact(&mut buf[..self.block_size])
    }

    /// This method truncates writes that exceed the block size.
    fn write_block(&self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        let max = std::cmp::min(self.block_size, buf.len());

        let mut fd = self.file()?;
        fd.seek(SeekFrom::Start(self.offset(blocknr)))?;
        fd.write_all(&buf[..max])
    }

    fn sync_disk(&self) -> std::io::Result<()> {
        self.file()?.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    block_size: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Sets the size in bytes of each block.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Whether to zero the whole region when building. Defaults to true.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 || self.block_size == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block count and block size must be non-zero",
            ));
        }
        if self.clear {
            self.zero_medium()?;
        }
        Ok(FileBlockEmulator {
            fd: Mutex::new(self.fd),
            block_count: self.block_count,
            block_size: self.block_size,
        })
    }

    fn zero_medium(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; self.block_size];
        {
            // Buffer each block write to prevent excessive syscalls.
            let mut bfd = BufWriter::new(&self.fd);
            for _ in 0..self.block_count {
                bfd.write_all(&zeroes)?;
            }
            bfd.flush()?;
        }
        // Drop anything a previous, larger region left past the end.
        self.fd
            .set_len((self.block_count * self.block_size) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(blocks: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * DEFAULT_BLOCK_SIZE as u64
        );
    }

    #[test]
    fn custom_block_size_sizes_region() {
        let fs_block = tempfile::tempfile().unwrap();
        let disk_emu = FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(3)
            .with_block_size(512)
            .build()
            .unwrap();
        assert_eq!(disk_emu.block_size(), 512);
        assert_eq!(disk_emu.block_count(), 3);
        assert_eq!(disk_emu.into_file().metadata().unwrap().len(), 3 * 512);
    }

    #[test]
    fn can_read_and_write_blocks() {
        let disk_emu = emulator(4);

        // Allocate a block with a non-zero character.
        let block = vec![0x55; DEFAULT_BLOCK_SIZE];
        disk_emu.write_block(2, &block).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_block = vec![0x00; DEFAULT_BLOCK_SIZE];
        // Read a different block.
        disk_emu.read_block(3, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x00; DEFAULT_BLOCK_SIZE]);

        // Read the block with data.
        let mut filled_block = vec![0x00; DEFAULT_BLOCK_SIZE];
        disk_emu.read_block(2, &mut filled_block).unwrap();
        assert_eq!(filled_block, vec![0x55; DEFAULT_BLOCK_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let disk_emu = emulator(2);

        disk_emu.write_block(0, &[0x11; DEFAULT_BLOCK_SIZE]).unwrap();
        disk_emu.write_block(1, &[0x22; DEFAULT_BLOCK_SIZE]).unwrap();

        let mut read_block = vec![0x00; DEFAULT_BLOCK_SIZE];
        disk_emu.read_block(0, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x11; DEFAULT_BLOCK_SIZE]);

        disk_emu.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x22; DEFAULT_BLOCK_SIZE]);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let disk_emu = emulator(1);

        let block = vec![0x55; DEFAULT_BLOCK_SIZE];
        let err = disk_emu.write_block(1, &block).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut buf = vec![0; DEFAULT_BLOCK_SIZE];
        assert!(disk_emu.read_block(1, &mut buf).is_err());
    }

    #[test]
    fn short_read_buffer_is_rejected() {
        let disk_emu = emulator(1);
        let mut buf = vec![0; DEFAULT_BLOCK_SIZE / 2];
        assert!(disk_emu.read_block(0, &mut buf).is_err());
    }

    #[test]
    fn writing_less_than_a_block_leaves_tail_untouched() {
        let disk_emu = emulator(1);
        disk_emu.write_block(0, &[0x77; DEFAULT_BLOCK_SIZE]).unwrap();

        // Fill half the block with meaningful data.
        disk_emu
            .write_block(0, &[0x55; DEFAULT_BLOCK_SIZE / 2])
            .expect("failed to write block");

        let mut buf = vec![0; DEFAULT_BLOCK_SIZE];
        disk_emu.read_block(0, &mut buf).unwrap();
        assert_eq!(&buf[..DEFAULT_BLOCK_SIZE / 2], &[0x55; DEFAULT_BLOCK_SIZE / 2][..]);
        assert_eq!(&buf[DEFAULT_BLOCK_SIZE / 2..], &[0x77; DEFAULT_BLOCK_SIZE / 2][..]);
    }

    #[test]
    fn zero_sized_geometry_is_rejected() {
        let fs_block = tempfile::tempfile().unwrap();
        assert!(FileBlockEmulatorBuilder::from(fs_block).build().is_err());
    }

    #[test]
    fn reopened_disk_keeps_contents_when_not_cleared() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let emu = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(2)
            .build()
            .unwrap();
        emu.write_block(1, &[0x42; DEFAULT_BLOCK_SIZE]).unwrap();
        emu.sync_disk().unwrap();

        let reopened =
            FileBlockEmulator::open_disk(disk.path(), 2, DEFAULT_BLOCK_SIZE).unwrap();
        let mut buf = vec![0; DEFAULT_BLOCK_SIZE];
        reopened.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0x42; DEFAULT_BLOCK_SIZE]);
    }
}
