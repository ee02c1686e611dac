use crate::fs::BLOCK_SIZE;
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Block pointers held directly in the inode.
pub const NDIRECT: usize = 32;
/// Block pointers held in the single indirect block.
pub const NINDIRECT: usize = BLOCK_SIZE / std::mem::size_of::<u32>();
/// Largest file, in blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;
/// Largest file, in bytes.
pub const MAX_FILE_SIZE: usize = MAXFILE * BLOCK_SIZE;

pub const NODE_SIZE: usize = std::mem::size_of::<Inode>();
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / NODE_SIZE;

/// The kind of object an allocated inode describes. A stored type of zero
/// marks a free slot, so none of these are zero.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory = 1,
    File = 2,
    Symlink = 3,
}

impl FileType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(FileType::Directory),
            2 => Some(FileType::File),
            3 => Some(FileType::Symlink),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Copy, Clone, PartialEq, Eq)]
/// On-disk inode record, packed `INODES_PER_BLOCK` to a block.
pub struct Inode {
    /// Raw `FileType` tag, zero when the slot is free.
    pub kind: u32,
    /// The total size of the file in bytes.
    pub size: u32,
    /// Seconds since epoch of the last access.
    pub atime: u32,
    /// Seconds since epoch of the last content change.
    pub mtime: u32,
    /// Seconds since epoch of the last metadata change.
    pub ctime: u32,
    /// `NDIRECT` direct pointers followed by the indirect block pointer.
    pub blocks: [u32; NDIRECT + 1],
}

impl Inode {
    pub fn new(kind: FileType) -> Self {
        let mut node = Self::new_zeroed();
        node.kind = kind as u32;
        node
    }

    pub fn is_free(&self) -> bool {
        self.kind == 0
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_raw(self.kind)
    }

    pub fn indirect(&self) -> u32 {
        self.blocks[NDIRECT]
    }

    /// Data blocks needed to hold the current size.
    pub fn block_count(&self) -> usize {
        blocks_for(self.size as usize)
    }

    pub fn touch(&mut self) {
        let now = now();
        self.atime = now;
        self.mtime = now;
        self.ctime = now;
    }
}

/// A block reinterpreted as a table of data block pointers.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone)]
pub struct IndirectBlock {
    pub entries: [u32; NINDIRECT],
}

/// The externally visible metadata of an inode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub kind: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl Attributes {
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_raw(self.kind)
    }
}

impl From<&Inode> for Attributes {
    fn from(node: &Inode) -> Self {
        Self {
            kind: node.kind,
            size: node.size,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
        }
    }
}

/// Number of blocks needed to hold `size` bytes.
pub fn blocks_for(size: usize) -> usize {
    (size + BLOCK_SIZE - 1) / BLOCK_SIZE
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_packs_three_per_block() {
        assert_eq!(NODE_SIZE, 152);
        assert_eq!(INODES_PER_BLOCK, 3);
        assert_eq!(std::mem::size_of::<IndirectBlock>(), BLOCK_SIZE);
        assert_eq!(MAXFILE, 160);
    }

    #[test]
    fn new_inode_is_zeroed_except_type() {
        let node = Inode::new(FileType::File);
        assert_eq!(node.file_type(), Some(FileType::File));
        assert_eq!(node.size, 0);
        assert_eq!(node.mtime, 0);
        assert!(node.blocks.iter().all(|&b| b == 0));
        assert!(Inode::new_zeroed().is_free());
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(BLOCK_SIZE), 1);
        assert_eq!(blocks_for(BLOCK_SIZE + 1), 2);
    }

    #[test]
    fn inode_survives_a_trip_through_bytes() {
        let mut node = Inode::new(FileType::Directory);
        node.size = 700;
        node.blocks[0] = 400;
        node.blocks[NDIRECT] = 401;

        assert_eq!(Inode::read_from(node.as_bytes()), Some(node));
    }
}
