use crate::alloc::BlockManager;
use crate::io::{BlockNumber, BlockStorage, Disk};
use crate::node::{
    blocks_for, Attributes, FileType, IndirectBlock, Inode, INODES_PER_BLOCK, MAXFILE,
    MAX_FILE_SIZE, NDIRECT, NODE_SIZE,
};

use crate::sb::SuperBlock;

use log::debug;
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const BLOCK_SIZE: usize = 512;
/// Blocks on a default disk (16 MiB).
pub const BLOCK_NUM: usize = 1024 * 1024 * 16 / BLOCK_SIZE;
/// Inode slots on a default disk.
pub const INODE_NUM: usize = 1024;

/// Inode number of the root directory, allocated when the manager is created.
pub const ROOT_INUM: u32 = 1;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("inode {0} does not exist")]
    DoesNotExist(u32),
    #[error("no free data blocks")]
    OutOfSpace,
    #[error("no free inodes")]
    OutOfInodes,
    #[error("inconsistent file system state: {0}")]
    Corrupt(String),
    #[error("block device failure")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Size of the disk and of its inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub nblocks: usize,
    pub ninodes: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            nblocks: BLOCK_NUM,
            ninodes: INODE_NUM,
        }
    }
}

impl Geometry {
    pub fn with_blocks(mut self, nblocks: usize) -> Self {
        self.nblocks = nblocks;
        self
    }

    pub fn with_inodes(mut self, ninodes: usize) -> Self {
        self.ninodes = ninodes;
        self
    }
}

/// Files on top of a block manager. Each file is an inode in the inode table
/// whose block pointers map file offsets to data blocks: the first `NDIRECT`
/// blocks directly, the rest through one indirect block.
///
/// Callers are expected to serialize access; nothing here locks.
pub struct InodeManager<T: BlockStorage> {
    bm: BlockManager<T>,
    /// Where the next scan for a free inode starts.
    cursor: u32,
}

impl InodeManager<Disk> {
    /// An engine over a fresh in-memory disk of the default geometry.
    pub fn new() -> Result<Self> {
        Self::with_geometry(Geometry::default())
    }

    pub fn with_geometry(geometry: Geometry) -> Result<Self> {
        // Reject the geometry before sizing the in-memory disk after it.
        SuperBlock::new(geometry.nblocks, geometry.ninodes)?;
        Self::create(Disk::new(geometry.nblocks), geometry.ninodes)
    }
}

impl<T: BlockStorage> InodeManager<T> {
    /// Formats `dev` and allocates the root directory.
    pub fn create(dev: T, ninodes: usize) -> Result<Self> {
        let mut im = Self {
            bm: BlockManager::create(dev, ninodes)?,
            cursor: ROOT_INUM,
        };
        let root = im.allocate_inode(FileType::Directory)?;
        if root != ROOT_INUM {
            return Err(Error::Corrupt(format!(
                "root directory allocated as inode {}, expected {}",
                root, ROOT_INUM
            )));
        }
        Ok(im)
    }

    pub fn block_manager(&self) -> &BlockManager<T> {
        &self.bm
    }

    pub fn sync(&mut self) -> Result<()> {
        self.bm.sync()
    }

    pub fn into_device(self) -> T {
        self.bm.into_device()
    }

    fn ninodes(&self) -> u32 {
        self.bm.super_block().ninodes
    }

    /// Creates an empty file of the given type and returns its inode number.
    ///
    /// # Errors
    ///
    /// `OutOfInodes` when every slot is taken, even after wrapping back to the
    /// start of the table.
    pub fn allocate_inode(&mut self, kind: FileType) -> Result<u32> {
        let found = match self.scan_inodes(self.cursor)? {
            Some(inum) => Some(inum),
            None if self.cursor > ROOT_INUM => {
                self.cursor = ROOT_INUM;
                self.scan_inodes(ROOT_INUM)?
            }
            None => None,
        };

        let inum = found.ok_or(Error::OutOfInodes)?;
        self.cursor = inum;
        self.put_inode(inum, &Inode::new(kind))?;
        debug!("allocated inode {} as {:?}", inum, kind);
        Ok(inum)
    }

    fn scan_inodes(&mut self, start: u32) -> Result<Option<u32>> {
        for inum in start..self.ninodes() {
            if self.get_inode(inum)?.is_none() {
                return Ok(Some(inum));
            }
        }
        Ok(None)
    }

    /// Clears the inode so its slot can be reused. Blocks it still points at
    /// are left alone; `remove_file` releases them first.
    pub fn free_inode(&mut self, inum: u32) -> Result<()> {
        self.check_inum(inum)?;
        if self.get_inode(inum)?.is_some() {
            self.put_inode(inum, &Inode::new_zeroed())?;
            debug!("freed inode {}", inum);
        }
        Ok(())
    }

    /// Returns a copy of the inode, or `None` when it is free or out of range.
    pub fn get_inode(&mut self, inum: u32) -> Result<Option<Inode>> {
        if inum >= self.ninodes() {
            return Ok(None);
        }
        let mut block = [0; BLOCK_SIZE];
        self.bm
            .read_block(self.bm.super_block().inode_block(inum), &mut block)?;
        let offset = Self::inode_offset(inum);
        let node = Inode::read_from(&block[offset..offset + NODE_SIZE])
            .ok_or_else(|| Error::Corrupt(format!("unreadable record for inode {}", inum)))?;
        Ok(if node.is_free() { None } else { Some(node) })
    }

    /// Stores the record of `inum`, leaving its neighbours in the block intact.
    pub fn put_inode(&mut self, inum: u32, node: &Inode) -> Result<()> {
        self.check_inum(inum)?;
        let blocknr = self.bm.super_block().inode_block(inum);
        let mut block = [0; BLOCK_SIZE];
        self.bm.read_block(blocknr, &mut block)?;
        let offset = Self::inode_offset(inum);
        block[offset..offset + NODE_SIZE].copy_from_slice(node.as_bytes());
        self.bm.write_block(blocknr, &block)
    }

    fn inode_offset(inum: u32) -> usize {
        (inum as usize % INODES_PER_BLOCK) * NODE_SIZE
    }

    fn check_inum(&self, inum: u32) -> Result<()> {
        if inum == 0 || inum >= self.ninodes() {
            return Err(Error::InvalidArgument(format!(
                "inode {} out of range 1..{}",
                inum,
                self.ninodes()
            )));
        }
        Ok(())
    }

    /// Loads an inode that callers expect to exist.
    fn load(&mut self, inum: u32) -> Result<Inode> {
        let node = self.get_inode(inum)?.ok_or(Error::DoesNotExist(inum))?;
        if node.size as usize > MAX_FILE_SIZE {
            return Err(Error::Corrupt(format!(
                "inode {} records {} bytes, more than the {} byte maximum",
                inum, node.size, MAX_FILE_SIZE
            )));
        }
        Ok(node)
    }

    /// Returns the content of the file together with its size. The buffer is
    /// a whole number of blocks long, so anything past `size` is leftover from
    /// the last block and not part of the file.
    pub fn read_file(&mut self, inum: u32) -> Result<(Vec<u8>, usize)> {
        let node = self.load(inum)?;
        let nblocks = node.block_count();
        let blocks = self.block_list(&node, nblocks)?;

        let mut content = vec![0; nblocks * BLOCK_SIZE];
        for (chunk, &blocknr) in content.chunks_mut(BLOCK_SIZE).zip(blocks.iter()) {
            self.bm.read_block(blocknr, chunk)?;
        }
        debug!("read {} bytes from inode {}", node.size, inum);
        Ok((content, node.size as usize))
    }

    /// Replaces the content of the file, growing or shrinking its block list
    /// to fit. Content past `MAX_FILE_SIZE` is dropped.
    pub fn write_file(&mut self, inum: u32, buf: &[u8]) -> Result<()> {
        let mut node = self.load(inum)?;
        let current = node.block_count();
        let required = blocks_for(buf.len()).min(MAXFILE);
        if buf.len() > MAX_FILE_SIZE {
            debug!(
                "truncating {} byte write to inode {} at {} bytes",
                buf.len(),
                inum,
                MAX_FILE_SIZE
            );
        }

        // Blocks only return to the pool once the shrunken inode is stored,
        // and blocks claimed for growth go back if anything fails first.
        let claimed = if required > current {
            self.grow(&mut node, current, required)?
        } else {
            Vec::new()
        };
        let detached = if required < current {
            self.detach(&mut node, current, required)?
        } else {
            Vec::new()
        };
        node.touch();
        node.size = buf.len().min(MAX_FILE_SIZE) as u32;

        if let Err(e) = self.store(inum, &node, buf, required) {
            self.release(&claimed)?;
            return Err(e);
        }
        self.release(&detached)?;
        debug!("wrote {} bytes to inode {}", node.size, inum);
        Ok(())
    }

    /// Writes the content blocks and then the inode record.
    fn store(&mut self, inum: u32, node: &Inode, buf: &[u8], nblocks: usize) -> Result<()> {
        let blocks = self.block_list(node, nblocks)?;
        let mut block = [0; BLOCK_SIZE];
        for (chunk, &blocknr) in buf.chunks(BLOCK_SIZE).zip(blocks.iter()) {
            if chunk.len() == BLOCK_SIZE {
                self.bm.write_block(blocknr, chunk)?;
            } else {
                block[..chunk.len()].copy_from_slice(chunk);
                block[chunk.len()..].iter_mut().for_each(|b| *b = 0);
                self.bm.write_block(blocknr, &block)?;
            }
        }
        self.put_inode(inum, node)
    }

    fn release(&mut self, blocks: &[BlockNumber]) -> Result<()> {
        for &blocknr in blocks {
            self.bm.free(blocknr)?;
        }
        Ok(())
    }

    /// Metadata of the inode. A free inode reads as all zero attributes.
    pub fn get_attributes(&mut self, inum: u32) -> Result<Attributes> {
        Ok(self
            .get_inode(inum)?
            .map(|node| Attributes::from(&node))
            .unwrap_or_default())
    }

    /// Releases every block of the file and then the inode itself.
    pub fn remove_file(&mut self, inum: u32) -> Result<()> {
        let node = self.load(inum)?;
        let nblocks = node.block_count();
        let mut blocks = self.block_list(&node, nblocks)?;
        if nblocks > NDIRECT {
            blocks.push(node.indirect() as BlockNumber);
        }
        self.free_inode(inum)?;
        self.release(&blocks)?;
        debug!("removed inode {} and {} data blocks", inum, nblocks);
        Ok(())
    }

    /// Resolves the first `nblocks` data blocks of the file, direct pointers
    /// first.
    fn block_list(&mut self, node: &Inode, nblocks: usize) -> Result<Vec<BlockNumber>> {
        let mut blocks: Vec<BlockNumber> = node.blocks[..nblocks.min(NDIRECT)]
            .iter()
            .map(|&b| b as BlockNumber)
            .collect();
        if nblocks > NDIRECT {
            let table = self.read_indirect(node)?;
            blocks.extend(
                table.entries[..nblocks - NDIRECT]
                    .iter()
                    .map(|&b| b as BlockNumber),
            );
        }
        Ok(blocks)
    }

    fn read_indirect(&mut self, node: &Inode) -> Result<IndirectBlock> {
        let mut block = [0; BLOCK_SIZE];
        self.bm.read_block(node.indirect() as BlockNumber, &mut block)?;
        IndirectBlock::read_from(&block[..])
            .ok_or_else(|| Error::Corrupt("unreadable indirect block".to_string()))
    }

    fn write_indirect(&mut self, node: &Inode, table: &IndirectBlock) -> Result<()> {
        self.bm
            .write_block(node.indirect() as BlockNumber, table.as_bytes())
    }

    /// Extends the block list from `current` to `required` blocks and returns
    /// the blocks claimed for it. All blocks are claimed up front; if the disk
    /// runs out, or the indirect block cannot be written, the ones claimed
    /// here go back to the pool.
    fn grow(
        &mut self,
        node: &mut Inode,
        current: usize,
        required: usize,
    ) -> Result<Vec<BlockNumber>> {
        let needs_indirect = current <= NDIRECT && required > NDIRECT;
        let wanted = required - current + needs_indirect as usize;

        let mut claimed = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match self.bm.allocate() {
                Ok(blocknr) => claimed.push(blocknr),
                Err(e) => {
                    self.release(&claimed)?;
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.link(node, current, required, &claimed) {
            self.release(&claimed)?;
            return Err(e);
        }
        Ok(claimed)
    }

    /// Points `node` at freshly claimed blocks, direct slots first.
    fn link(
        &mut self,
        node: &mut Inode,
        current: usize,
        required: usize,
        claimed: &[BlockNumber],
    ) -> Result<()> {
        let mut claimed = claimed.iter().map(|&blocknr| blocknr as u32);
        let mut next = || claimed.next().unwrap_or_default();

        for i in current..required.min(NDIRECT) {
            node.blocks[i] = next();
        }
        if required > NDIRECT {
            let mut table = if current <= NDIRECT {
                node.blocks[NDIRECT] = next();
                IndirectBlock::new_zeroed()
            } else {
                self.read_indirect(node)?
            };
            for i in current.max(NDIRECT)..required {
                table.entries[i - NDIRECT] = next();
            }
            self.write_indirect(node, &table)?;
        }
        Ok(())
    }

    /// Cuts the block list from `current` down to `required` blocks and
    /// returns the blocks no longer referenced, the indirect block included
    /// once nothing past `NDIRECT` is left. Nothing is freed here and the
    /// indirect block on disk is left as it was.
    fn detach(
        &mut self,
        node: &mut Inode,
        current: usize,
        required: usize,
    ) -> Result<Vec<BlockNumber>> {
        let mut detached = Vec::with_capacity(current - required + 1);
        if current > NDIRECT {
            let table = self.read_indirect(node)?;
            detached.extend(
                table.entries[required.max(NDIRECT) - NDIRECT..current - NDIRECT]
                    .iter()
                    .map(|&b| b as BlockNumber),
            );
            if required <= NDIRECT {
                detached.push(node.indirect() as BlockNumber);
                node.blocks[NDIRECT] = 0;
            }
        }
        for i in required..current.min(NDIRECT) {
            detached.push(node.blocks[i] as BlockNumber);
            node.blocks[i] = 0;
        }
        Ok(detached)
    }
}
