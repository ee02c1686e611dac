use inodefs::{FileType, InodeManager, ROOT_INUM};

pub fn main() -> inodefs::Result<()> {
    let mut im = InodeManager::new()?;

    let inum = im.allocate_inode(FileType::File)?;
    im.write_file(inum, b"hello, blocks")?;

    let (content, size) = im.read_file(inum)?;
    println!(
        "inode {}: {:?}",
        inum,
        String::from_utf8_lossy(&content[..size])
    );
    println!("root: {:?}", im.get_attributes(ROOT_INUM)?);
    println!("file: {:?}", im.get_attributes(inum)?);
    println!("free blocks: {}", im.block_manager().free_blocks());

    im.remove_file(inum)?;
    Ok(())
}
