//! Block address translation and release.
//!
//! A file's logical blocks are partitioned into three tiers: block 0 is
//! held directly by the inode, the next N go through one indirection table,
//! and the next N² through a two-level tree, where N is the number of
//! sector addresses per table sector. [`BlockPos::classify`] is the only
//! place that tier arithmetic lives; the allocate and free paths both
//! decompose through it.
//!
//! Every allocation is persisted before the call returns: the bitmap
//! sector, the table sector, and the inode record whenever a tier root
//! changes. There is no deferred metadata flush, so the window of on-disk
//! inconsistency is a single unflushed write.

use log::debug;

use crate::common::{div_round_up, BofsError, BofsResult};
use crate::device::BlockDevice;
use crate::fs::Bofs;
use crate::inode::Inode;
use crate::{u32, SECTOR_SIZE};

/// Sector addresses per indirection table sector.
pub const INDIRECT_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Last logical block of the direct tier.
pub const BLOCK_LEVEL0: u32 = 0;
/// Last logical block of the single-indirect tier.
pub const BLOCK_LEVEL1: u32 = BLOCK_LEVEL0 + INDIRECT_PER_SECTOR as u32;
/// Last logical block of the double-indirect tier.
pub const BLOCK_LEVEL2: u32 = BLOCK_LEVEL1 + (INDIRECT_PER_SECTOR * INDIRECT_PER_SECTOR) as u32;

/// A logical block number decomposed into its tier and table slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPos {
    /// `inode.block[0]` is the data sector itself.
    Direct,
    /// Entry `slot` of the table at `inode.block[1]`.
    Single { slot: usize },
    /// Entry `slot1` of the second-level table at entry `slot0` of the
    /// root table at `inode.block[2]`.
    Double { slot0: usize, slot1: usize },
}

impl BlockPos {
    pub fn classify(block_id: u32) -> BofsResult<Self> {
        const N: u32 = INDIRECT_PER_SECTOR as u32;
        if block_id == BLOCK_LEVEL0 {
            Ok(Self::Direct)
        } else if block_id <= BLOCK_LEVEL1 {
            Ok(Self::Single {
                slot: (block_id - BLOCK_LEVEL0 - 1) as usize,
            })
        } else if block_id <= BLOCK_LEVEL2 {
            let residual = block_id - BLOCK_LEVEL1 - 1;
            Ok(Self::Double {
                slot0: (residual / N) as usize,
                slot1: (residual % N) as usize,
            })
        } else {
            Err(BofsError::BlockOutOfRange)
        }
    }
}

fn table_entry(table: &[u8], slot: usize) -> u32 {
    u32!(table[slot * 4..slot * 4 + 4])
}

fn set_table_entry(table: &mut [u8], slot: usize, lba: u32) {
    table[slot * 4..slot * 4 + 4].copy_from_slice(&lba.to_le_bytes());
}

fn table_is_empty(table: &[u8]) -> bool {
    table.iter().all(|&b| b == 0)
}

impl<D: BlockDevice> Bofs<D> {
    /// Resolve logical block `block_id` of `inode` to the sector address
    /// holding its data, allocating through the indirection tiers on first
    /// touch. Resolving an already-allocated block performs no allocation
    /// and returns the same address every time.
    pub fn locate_block(&mut self, inode: &mut Inode, block_id: u32) -> BofsResult<u32> {
        match BlockPos::classify(block_id)? {
            BlockPos::Direct => {
                if inode.block[0] == 0 {
                    let lba = self.alloc_sector()?;
                    inode.block[0] = lba;
                    self.sync_inode(inode)?;
                    debug!("inode {}: block 0 -> new sector {}", inode.id, lba);
                }
                Ok(inode.block[0])
            }
            BlockPos::Single { slot } => {
                let (root, fresh) = self.tier_root(inode, 1)?;
                let mut table = [0u8; SECTOR_SIZE];
                if !fresh {
                    self.read_sector(root, &mut table)?;
                }
                self.locate_in_table(root, &mut table, slot)
            }
            BlockPos::Double { slot0, slot1 } => {
                let (root, fresh) = self.tier_root(inode, 2)?;
                let mut table0 = [0u8; SECTOR_SIZE];
                if !fresh {
                    self.read_sector(root, &mut table0)?;
                }

                let mut mid = table_entry(&table0, slot0);
                let mut mid_fresh = false;
                if mid == 0 {
                    mid = self.alloc_table_sector()?;
                    set_table_entry(&mut table0, slot0, mid);
                    self.write_sector(root, &table0)?;
                    mid_fresh = true;
                }

                let mut table1 = [0u8; SECTOR_SIZE];
                if !mid_fresh {
                    self.read_sector(mid, &mut table1)?;
                }
                self.locate_in_table(mid, &mut table1, slot1)
            }
        }
    }

    /// Free the data sector behind logical block `block_id` and cascade:
    /// an indirection table whose entries are all zero afterwards is itself
    /// freed and unlinked from its parent, transitively up to the inode.
    ///
    /// Returns the freed data sector address, or `Ok(None)` when the block
    /// was never allocated.
    pub fn release_block(&mut self, inode: &mut Inode, block_id: u32) -> BofsResult<Option<u32>> {
        match BlockPos::classify(block_id)? {
            BlockPos::Direct => {
                let lba = inode.block[0];
                if lba == 0 {
                    return Ok(None);
                }
                inode.block[0] = 0;
                self.sync_inode(inode)?;
                self.free_sector(lba)?;
                Ok(Some(lba))
            }
            BlockPos::Single { slot } => {
                let root = inode.block[1];
                if root == 0 {
                    return Ok(None);
                }
                let (data, root_empty) = match self.detach_slot(root, slot)? {
                    Some(freed) => freed,
                    None => return Ok(None),
                };
                if root_empty {
                    inode.block[1] = 0;
                    self.sync_inode(inode)?;
                    self.free_sector(root)?;
                    debug!("inode {}: single-indirect table {} released", inode.id, root);
                }
                Ok(Some(data))
            }
            BlockPos::Double { slot0, slot1 } => {
                let root = inode.block[2];
                if root == 0 {
                    return Ok(None);
                }
                let mut table0 = [0u8; SECTOR_SIZE];
                self.read_sector(root, &mut table0)?;
                let mid = table_entry(&table0, slot0);
                if mid == 0 {
                    return Ok(None);
                }

                let (data, mid_empty) = match self.detach_slot(mid, slot1)? {
                    Some(freed) => freed,
                    None => return Ok(None),
                };
                if mid_empty {
                    // Detaching the drained second-level table also frees it.
                    if let Some((_, root_empty)) = self.detach_slot(root, slot0)? {
                        if root_empty {
                            inode.block[2] = 0;
                            self.sync_inode(inode)?;
                            self.free_sector(root)?;
                            debug!(
                                "inode {}: double-indirect root {} released",
                                inode.id, root
                            );
                        }
                    }
                }
                Ok(Some(data))
            }
        }
    }

    /// Free every logical block currently implied by `inode.size`, from
    /// block 0 upward. A zero-size inode is a no-op.
    pub fn release_all(&mut self, inode: &mut Inode) -> BofsResult<()> {
        if inode.size == 0 {
            return Ok(());
        }
        let blocks = div_round_up(inode.size, SECTOR_SIZE as u32);
        debug!("inode {}: releasing {} blocks", inode.id, blocks);
        for block_id in 0..blocks {
            self.release_block(inode, block_id)?;
        }
        Ok(())
    }

    /// Root table of tier 1 or 2, allocating it on first touch. The flag
    /// reports a fresh root, whose table is all-zero on disk and need not
    /// be read back.
    fn tier_root(&mut self, inode: &mut Inode, tier: usize) -> BofsResult<(u32, bool)> {
        if inode.block[tier] != 0 {
            return Ok((inode.block[tier], false));
        }
        let lba = self.alloc_table_sector()?;
        inode.block[tier] = lba;
        self.sync_inode(inode)?;
        debug!("inode {}: tier {} root -> new sector {}", inode.id, tier, lba);
        Ok((lba, true))
    }

    /// Allocate a sector destined to hold an indirection table and zero it
    /// on disk, so stale bytes can never be read back as entries.
    fn alloc_table_sector(&mut self) -> BofsResult<u32> {
        let lba = self.alloc_sector()?;
        let zeroes = [0u8; SECTOR_SIZE];
        self.write_sector(lba, &zeroes)?;
        Ok(lba)
    }

    /// Resolve `slot` within the table staged in `table` (backed by sector
    /// `table_lba`), allocating a data sector and writing the table back
    /// when the entry is zero.
    fn locate_in_table(&mut self, table_lba: u32, table: &mut [u8], slot: usize) -> BofsResult<u32> {
        let entry = table_entry(table, slot);
        if entry != 0 {
            return Ok(entry);
        }
        let lba = self.alloc_sector()?;
        set_table_entry(table, slot, lba);
        self.write_sector(table_lba, table)?;
        Ok(lba)
    }

    /// Unlink entry `slot` of the table at `table_lba`, free the sector it
    /// pointed to, and report whether the table is empty afterwards.
    /// `Ok(None)` when the entry was already zero. Both release tiers
    /// cascade through this one helper.
    ///
    /// The entry is zeroed and persisted before the child sector is freed.
    fn detach_slot(&mut self, table_lba: u32, slot: usize) -> BofsResult<Option<(u32, bool)>> {
        let mut table = [0u8; SECTOR_SIZE];
        self.read_sector(table_lba, &mut table)?;
        let child = table_entry(&table, slot);
        if child == 0 {
            return Ok(None);
        }
        set_table_entry(&mut table, slot, 0);
        self.write_sector(table_lba, &table)?;
        self.free_sector(child)?;
        Ok(Some((child, table_is_empty(&table))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "sec512")]
    fn tier_bounds_for_512_byte_sectors() {
        assert_eq!(INDIRECT_PER_SECTOR, 128);
        assert_eq!(BLOCK_LEVEL1, 128);
        assert_eq!(BLOCK_LEVEL2, 16512);
    }

    #[test]
    fn classify_direct() {
        assert_eq!(BlockPos::classify(0).unwrap(), BlockPos::Direct);
    }

    #[test]
    fn classify_single_tier_edges() {
        assert_eq!(
            BlockPos::classify(1).unwrap(),
            BlockPos::Single { slot: 0 }
        );
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL1).unwrap(),
            BlockPos::Single {
                slot: INDIRECT_PER_SECTOR - 1
            }
        );
    }

    #[test]
    fn classify_double_tier_edges() {
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL1 + 1).unwrap(),
            BlockPos::Double { slot0: 0, slot1: 0 }
        );
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL1 + INDIRECT_PER_SECTOR as u32).unwrap(),
            BlockPos::Double {
                slot0: 0,
                slot1: INDIRECT_PER_SECTOR - 1
            }
        );
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL1 + INDIRECT_PER_SECTOR as u32 + 1).unwrap(),
            BlockPos::Double { slot0: 1, slot1: 0 }
        );
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL2).unwrap(),
            BlockPos::Double {
                slot0: INDIRECT_PER_SECTOR - 1,
                slot1: INDIRECT_PER_SECTOR - 1
            }
        );
    }

    #[test]
    fn classify_rejects_out_of_range() {
        assert_eq!(
            BlockPos::classify(BLOCK_LEVEL2 + 1),
            Err(BofsError::BlockOutOfRange)
        );
        assert_eq!(
            BlockPos::classify(u32::MAX),
            Err(BofsError::BlockOutOfRange)
        );
    }

    #[test]
    fn table_entry_round_trip() {
        let mut table = [0u8; SECTOR_SIZE];
        set_table_entry(&mut table, 5, 0xdead_beef);
        assert_eq!(table_entry(&table, 5), 0xdead_beef);
        assert!(!table_is_empty(&table));

        set_table_entry(&mut table, 5, 0);
        assert!(table_is_empty(&table));
    }
}
