use super::{check_access, BlockNumber, BlockStorage};
use crate::fs::BLOCK_SIZE;

/// A zero-initialised disk held entirely in memory as one contiguous buffer.
#[derive(Debug, Clone)]
pub struct Disk {
    blocks: Vec<u8>,
    block_count: usize,
}

impl Disk {
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: vec![0; block_count * BLOCK_SIZE],
            block_count,
        }
    }

    fn slot(&self, blocknr: BlockNumber) -> std::ops::Range<usize> {
        let start = blocknr * BLOCK_SIZE;
        start..start + BLOCK_SIZE
    }
}

impl BlockStorage for Disk {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        check_access(blocknr, self.block_count, buf.len())?;
        buf[..BLOCK_SIZE].copy_from_slice(&self.blocks[self.slot(blocknr)]);
        Ok(())
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        check_access(blocknr, self.block_count, buf.len())?;
        let slot = self.slot(blocknr);
        self.blocks[slot].copy_from_slice(&buf[..BLOCK_SIZE]);
        Ok(())
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
