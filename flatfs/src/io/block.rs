use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A flat region of fixed-size blocks. Block `i` occupies the byte range
/// `[i * block_size, (i + 1) * block_size)` of the region.
///
/// All methods take `&self` so a single store can be shared between threads;
/// implementations are responsible for serializing access to the medium.
pub trait BlockStorage: Send + Sync {
    /// Opens an existing region at the specified path. This method does not validate
    /// the storage blocks, it is up for clients to ensure disks are appropriately
    /// initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize, block_size: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Size in bytes of every block.
    fn block_size(&self) -> usize;
    /// Total number of blocks in the region, reserved blocks included.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer. The buffer must hold at
    /// least `block_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails on any fault of the underlying medium.
    fn read_block(&self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes exactly one block from the provided buffer, which must be
    /// `block_size` bytes long.
    ///
    /// # Errors
    ///
    /// Fails on any fault of the underlying medium.
    fn write_block(&self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&self) -> std::io::Result<()>;
}
