/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A device exposing a fixed number of `BLOCK_SIZE` byte blocks. Implementations
/// know nothing about allocation, inodes or files; they only copy bytes in and
/// out of numbered slots.
pub trait BlockStorage {
    /// The total number of blocks addressable on the device.
    fn block_count(&self) -> usize;
    /// Reads exactly one block into the front of the provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer smaller than a
    /// block, will return an error and leave the buffer untouched.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes exactly one block taken from the front of the provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or from a buffer smaller than a
    /// block, will return an error and leave the device untouched.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}

/// Shared bounds check for block device implementations.
pub(crate) fn check_access(
    blocknr: BlockNumber,
    block_count: usize,
    buf_len: usize,
) -> std::io::Result<()> {
    use crate::fs::BLOCK_SIZE;
    use std::io::{Error, ErrorKind};

    if blocknr >= block_count {
        return Err(Error::new(ErrorKind::InvalidInput, "block out of range"));
    }
    if buf_len < BLOCK_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "buffer does not contain enough space for a block",
        ));
    }
    Ok(())
}
