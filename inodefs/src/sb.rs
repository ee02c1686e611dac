use crate::fs::{Error, Result, BLOCK_SIZE};
use crate::node::INODES_PER_BLOCK;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Bitmap bits per block.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

/// Block id of the superblock.
pub const SUPERBLOCK_INDEX: usize = 0;
/// First block of the (reserved, non-authoritative) free-space bitmap.
pub const BITMAP_START: usize = 1;

/// The first block of the disk, describing its geometry.
///
/// Every other region boundary is derived from the block and inode counts:
///
/// ==============================================================
/// | SuperBlock | Bitmap (data region) | Inode table | Data Region |
/// ==============================================================
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Total bytes addressable on the disk.
    pub size: u32,
    /// Total blocks on the disk, including the metadata regions.
    pub nblocks: u32,
    /// Total inode slots in the inode table.
    pub ninodes: u32,
}

impl SuperBlock {
    /// Computes the geometry of a disk, rejecting layouts where the metadata
    /// regions leave no room for data.
    pub fn new(nblocks: usize, ninodes: usize) -> Result<Self> {
        let size = nblocks
            .checked_mul(BLOCK_SIZE)
            .filter(|&size| size <= u32::MAX as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("{} blocks do not fit a 32-bit disk", nblocks))
            })?;
        if ninodes < 2 || ninodes > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "inode count {} must leave room for the root inode",
                ninodes
            )));
        }

        let sb = Self {
            size: size as u32,
            nblocks: nblocks as u32,
            ninodes: ninodes as u32,
        };
        if sb.data_start() >= nblocks {
            return Err(Error::InvalidArgument(format!(
                "{} blocks cannot hold metadata for {} inodes",
                nblocks, ninodes
            )));
        }
        Ok(sb)
    }

    /// Reads a superblock back from the front of a block buffer.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from_prefix(buf)
    }

    /// Serializes the superblock into a zero padded block for writing to disk.
    pub fn serialize(&self) -> [u8; BLOCK_SIZE] {
        let mut block = [0; BLOCK_SIZE];
        block[..std::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
        block
    }

    pub fn bitmap_blocks(&self) -> usize {
        (self.nblocks as usize + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK
    }

    pub fn inode_table_start(&self) -> usize {
        BITMAP_START + self.bitmap_blocks()
    }

    pub fn inode_table_blocks(&self) -> usize {
        (self.ninodes as usize + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK
    }

    /// The block holding the record of inode `inum`.
    pub fn inode_block(&self, inum: u32) -> usize {
        self.inode_table_start() + inum as usize / INODES_PER_BLOCK
    }

    /// The first block past every metadata region. Allocation never returns
    /// anything below it.
    pub fn data_start(&self) -> usize {
        self.inode_table_start() + self.inode_table_blocks()
    }
}
