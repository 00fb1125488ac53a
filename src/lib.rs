//! BOFS block-mapping engine.
//!
//! Given an inode and a logical block number, this crate locates (and, on
//! write, lazily allocates) the physical sector that holds the block's data,
//! through a three-tier direct/single-indirect/double-indirect addressing
//! scheme. The reverse path frees data sectors and cascades the release of
//! indirection tables that become empty.
//!
//! The engine is single-threaded by construction: every mutating call takes
//! `&mut self` and no scratch state outlives a call. Directory entries, path
//! resolution and caching belong to the layers above.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod bitmap;
pub mod block_map;
pub mod common;
pub mod device;
pub mod fs;
pub mod inode;
pub mod super_block;


pub use block_map::{BlockPos, BLOCK_LEVEL0, BLOCK_LEVEL1, BLOCK_LEVEL2, INDIRECT_PER_SECTOR};
pub use common::{BofsError, BofsMode, BofsResult};
pub use device::{BlockDevice, RamDisk};
pub use fs::Bofs;
pub use inode::{Inode, BOFS_BLOCK_NR, INODE_SIZE};
pub use super_block::SuperBlock;

/// Decode a little-endian `u32` from a byte slice.
#[macro_export]
macro_rules! u32 {
    ($x:expr) => {
        u32::from_le_bytes($x.try_into().unwrap())
    };
}

/// Decode a little-endian `u16` from a byte slice.
#[macro_export]
macro_rules! u16 {
    ($x:expr) => {
        u16::from_le_bytes($x.try_into().unwrap())
    };
}

#[cfg(feature = "sec512")]
pub const SECTOR_SIZE: usize = 512;

#[cfg(feature = "sec1k")]
pub const SECTOR_SIZE: usize = 1024;

#[cfg(feature = "sec2k")]
pub const SECTOR_SIZE: usize = 2048;

#[cfg(feature = "sec4k")]
pub const SECTOR_SIZE: usize = 4096;
