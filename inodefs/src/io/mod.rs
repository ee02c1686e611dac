mod block;
mod disk;
mod emulator;

pub use block::{BlockNumber, BlockStorage};
pub(crate) use block::check_access;
pub use disk::Disk;
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
