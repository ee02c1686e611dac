use crate::fs::{Error, Result};
use crate::io::{BlockNumber, BlockStorage};
use crate::sb::{SuperBlock, SUPERBLOCK_INDEX};
use log::{debug, info, warn};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// One bit per block on the disk, held in memory only. The bitmap region
/// reserved on disk is never written; allocation state lives for the lifetime
/// of the process.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bitmap: vec![0; (len + 63) / 64],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, blocknr: usize) -> State {
        assert!(blocknr < self.len);
        let word = self.bitmap[blocknr / 64];
        match (word >> (blocknr % 64)) & 1 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, blocknr: usize) {
        assert!(blocknr < self.len);
        self.bitmap[blocknr / 64] |= 1_u64 << (blocknr % 64);
    }

    pub fn set_free(&mut self, blocknr: usize) {
        assert!(blocknr < self.len);
        self.bitmap[blocknr / 64] &= !(1_u64 << (blocknr % 64));
    }

    /// Number of set bits in `range`.
    pub fn count_used(&self, range: std::ops::Range<usize>) -> usize {
        range.filter(|&i| self.get(i) == State::Used).count()
    }
}

/// Owns the block device and decides which data blocks are free.
///
/// Allocation is next-fit: the scan starts where the previous allocation
/// landed and wraps to the start of the data region at most once.
pub struct BlockManager<T: BlockStorage> {
    dev: T,
    super_block: SuperBlock,
    used: Bitmap,
    /// Where the next scan for a free block starts.
    cursor: usize,
}

impl<T: BlockStorage> BlockManager<T> {
    /// Formats the device: computes the geometry, writes the superblock into
    /// block 0 and marks the whole data region free.
    pub fn create(mut dev: T, ninodes: usize) -> Result<Self> {
        let super_block = SuperBlock::new(dev.block_count(), ninodes)?;
        dev.write_block(SUPERBLOCK_INDEX, &super_block.serialize())?;
        info!(
            "formatted {} blocks ({} bytes) with {} inodes, data region starts at block {}",
            super_block.nblocks,
            super_block.size,
            super_block.ninodes,
            super_block.data_start()
        );

        Ok(Self {
            cursor: super_block.data_start(),
            used: Bitmap::new(dev.block_count()),
            super_block,
            dev,
        })
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// Marks the first free data block at or after the cursor as used and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Returns `OutOfSpace` once a scan from the start of the data region has
    /// also come up empty.
    pub fn allocate(&mut self) -> Result<BlockNumber> {
        let first = self.super_block.data_start();
        let found = match self.scan_from(self.cursor) {
            Some(blocknr) => Some(blocknr),
            // Everything before the cursor has not been looked at yet.
            None if self.cursor > first => {
                self.cursor = first;
                self.scan_from(first)
            }
            None => None,
        };

        match found {
            Some(blocknr) => {
                self.used.set_reserved(blocknr);
                self.cursor = blocknr;
                debug!("allocated block {}", blocknr);
                Ok(blocknr)
            }
            None => {
                warn!("no free blocks left in the data region");
                Err(Error::OutOfSpace)
            }
        }
    }

    /// Returns a data block to the free pool. Freeing a block that is already
    /// free has no effect.
    pub fn free(&mut self, blocknr: BlockNumber) -> Result<()> {
        if !self.data_region().contains(&blocknr) {
            return Err(Error::InvalidArgument(format!(
                "block {} is not in the data region",
                blocknr
            )));
        }
        if self.used.get(blocknr) == State::Free {
            warn!("block {} freed twice", blocknr);
        }
        self.used.set_free(blocknr);
        debug!("freed block {}", blocknr);
        Ok(())
    }

    pub fn is_allocated(&self, blocknr: BlockNumber) -> bool {
        self.data_region().contains(&blocknr) && self.used.get(blocknr) == State::Used
    }

    /// Number of data blocks that `allocate` could still hand out.
    pub fn free_blocks(&self) -> usize {
        let region = self.data_region();
        region.len() - self.used.count_used(region)
    }

    pub fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<()> {
        Ok(self.dev.read_block(blocknr, buf)?)
    }

    pub fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<()> {
        Ok(self.dev.write_block(blocknr, buf)?)
    }

    pub fn sync(&mut self) -> Result<()> {
        Ok(self.dev.sync_disk()?)
    }

    /// Gives the device back, discarding the allocation state.
    pub fn into_device(self) -> T {
        self.dev
    }

    fn data_region(&self) -> std::ops::Range<usize> {
        self.super_block.data_start()..self.used.len()
    }

    fn scan_from(&self, start: usize) -> Option<BlockNumber> {
        (start..self.used.len()).find(|&i| self.used.get(i) == State::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Disk;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn manager(blocks: usize) -> BlockManager<Disk> {
        BlockManager::create(Disk::new(blocks), 8).unwrap()
    }

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new(128);

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new(100);

        bmp.set_reserved(0);
        bmp.set_reserved(99);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(99), State::Used);
        assert_eq!(bmp.count_used(0..100), 2);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new(128);

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn allocations_start_past_the_metadata_regions() {
        let mut bm = manager(64);
        let first = bm.allocate().unwrap();
        assert_eq!(first, bm.super_block().data_start());
        assert_eq!(bm.allocate().unwrap(), first + 1);
    }

    #[test]
    fn superblock_is_written_to_block_zero() {
        let mut bm = manager(64);
        let mut buf = [0; crate::fs::BLOCK_SIZE];
        bm.read_block(SUPERBLOCK_INDEX, &mut buf).unwrap();
        assert_eq!(SuperBlock::parse(&buf).as_ref(), Some(bm.super_block()));
    }

    #[test]
    fn scan_wraps_to_reuse_freed_blocks() {
        let mut bm = manager(64);
        let capacity = bm.free_blocks();
        let blocks: Vec<_> = (0..capacity).map(|_| bm.allocate().unwrap()).collect();
        assert_eq!(bm.free_blocks(), 0);

        bm.free(blocks[3]).unwrap();
        assert_eq!(bm.allocate().unwrap(), blocks[3]);
    }

    #[test]
    fn full_disk_reports_out_of_space() {
        let mut bm = manager(64);
        while bm.free_blocks() > 0 {
            bm.allocate().unwrap();
        }
        match bm.allocate() {
            Err(Error::OutOfSpace) => (),
            other => panic!("expected OutOfSpace, got {:?}", other),
        }
    }

    #[test]
    fn double_free_is_idempotent() {
        let mut bm = manager(64);
        let before = bm.free_blocks();
        let blocknr = bm.allocate().unwrap();

        bm.free(blocknr).unwrap();
        bm.free(blocknr).unwrap();
        assert_eq!(bm.free_blocks(), before);
        assert!(!bm.is_allocated(blocknr));
    }

    #[test]
    fn freeing_metadata_blocks_is_rejected() {
        let mut bm = manager(64);
        assert!(bm.free(SUPERBLOCK_INDEX).is_err());
        assert!(bm.free(64).is_err());
    }

    proptest! {
        #[test]
        fn live_allocations_are_unique(ops in proptest::collection::vec(any::<(bool, usize)>(), 1..300)) {
            let mut bm = manager(64);
            let mut live: Vec<BlockNumber> = Vec::new();

            for (alloc, pick) in ops {
                if alloc || live.is_empty() {
                    match bm.allocate() {
                        Ok(blocknr) => {
                            prop_assert!(!live.contains(&blocknr));
                            live.push(blocknr);
                        }
                        Err(Error::OutOfSpace) => prop_assert_eq!(bm.free_blocks(), 0),
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                } else {
                    let blocknr = live.swap_remove(pick % live.len());
                    bm.free(blocknr).unwrap();
                }

                let unique: HashSet<_> = live.iter().collect();
                prop_assert_eq!(unique.len(), live.len());
                prop_assert_eq!(bm.free_blocks() + live.len(), 64 - bm.super_block().data_start());
            }
        }
    }
}
