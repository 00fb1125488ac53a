//! Sector bitmap allocator.
//!
//! One bit per data sector, mirrored in memory and written through to the
//! bitmap region of the disk one sector at a time. Index 0 is the first
//! data sector; [`SectorBitmap::idx_to_lba`] converts between the two
//! spaces.

use alloc::vec;
use alloc::vec::Vec;
use log::debug;

use crate::common::BofsResult;
use crate::device::BlockDevice;
use crate::super_block::SuperBlock;
use crate::SECTOR_SIZE;

const BITS_PER_SECTOR: u32 = (SECTOR_SIZE * 8) as u32;

pub struct SectorBitmap {
    map: Vec<u8>,
    bitmap_lba: u32,
    data_start_lba: u32,
    data_sectors: u32,
}

impl SectorBitmap {
    /// Fresh all-free bitmap for a newly formatted filesystem.
    pub fn new(sb: &SuperBlock) -> Self {
        Self {
            map: vec![0; sb.bitmap_sectors as usize * SECTOR_SIZE],
            bitmap_lba: sb.bitmap_lba,
            data_start_lba: sb.data_start_lba,
            data_sectors: sb.total_sectors - sb.data_start_lba,
        }
    }

    /// Rebuild the in-memory mirror from the bitmap region on disk.
    pub fn load<D: BlockDevice>(device: &D, sb: &SuperBlock) -> BofsResult<Self> {
        let mut bitmap = Self::new(sb);
        for i in 0..sb.bitmap_sectors {
            let start = i as usize * SECTOR_SIZE;
            device.read_sector(sb.bitmap_lba + i, &mut bitmap.map[start..start + SECTOR_SIZE])?;
        }
        Ok(bitmap)
    }

    /// Find a free index, mark it used and return it. `None` means the
    /// data area is exhausted. The change is in-memory only until
    /// [`SectorBitmap::sync`] persists it.
    pub fn alloc(&mut self) -> Option<u32> {
        for (byte_idx, byte) in self.map.iter_mut().enumerate() {
            if *byte == 0xff {
                continue;
            }
            let bit = (!*byte).trailing_zeros();
            let idx = byte_idx as u32 * 8 + bit;
            if idx >= self.data_sectors {
                return None;
            }
            *byte |= 1 << bit;
            debug!("bitmap: alloc idx {} (lba {})", idx, self.idx_to_lba(idx));
            return Some(idx);
        }
        None
    }

    /// Mark `idx` free again. In-memory only until synced.
    pub fn free(&mut self, idx: u32) {
        debug_assert!(self.is_used(idx), "freeing a free index");
        self.map[idx as usize / 8] &= !(1 << (idx % 8));
        debug!("bitmap: free idx {} (lba {})", idx, self.idx_to_lba(idx));
    }

    pub fn is_used(&self, idx: u32) -> bool {
        self.map[idx as usize / 8] & (1 << (idx % 8)) != 0
    }

    pub fn free_count(&self) -> u32 {
        (0..self.data_sectors).filter(|&idx| !self.is_used(idx)).count() as u32
    }

    /// Persist the bitmap sector that holds `idx`.
    pub fn sync<D: BlockDevice>(&self, device: &D, idx: u32) -> BofsResult<()> {
        let sector = idx / BITS_PER_SECTOR;
        let start = sector as usize * SECTOR_SIZE;
        device.write_sector(self.bitmap_lba + sector, &self.map[start..start + SECTOR_SIZE])
    }

    pub fn idx_to_lba(&self, idx: u32) -> u32 {
        self.data_start_lba + idx
    }

    pub fn lba_to_idx(&self, lba: u32) -> u32 {
        lba - self.data_start_lba
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;

    fn small_bitmap() -> SectorBitmap {
        let sb = SuperBlock::new(0, 1024, 32).unwrap();
        SectorBitmap::new(&sb)
    }

    #[test]
    fn alloc_is_first_fit() {
        let mut bitmap = small_bitmap();
        assert_eq!(bitmap.alloc(), Some(0));
        assert_eq!(bitmap.alloc(), Some(1));
        assert_eq!(bitmap.alloc(), Some(2));

        bitmap.free(1);
        assert_eq!(bitmap.alloc(), Some(1));
    }

    #[test]
    fn free_count_tracks_allocations() {
        let mut bitmap = small_bitmap();
        let total = bitmap.free_count();
        let idx = bitmap.alloc().unwrap();
        assert_eq!(bitmap.free_count(), total - 1);
        bitmap.free(idx);
        assert_eq!(bitmap.free_count(), total);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut bitmap = small_bitmap();
        while bitmap.alloc().is_some() {}
        assert_eq!(bitmap.free_count(), 0);
        assert_eq!(bitmap.alloc(), None);
    }

    #[test]
    fn lba_conversion_round_trip() {
        let bitmap = small_bitmap();
        let lba = bitmap.idx_to_lba(7);
        assert_eq!(bitmap.lba_to_idx(lba), 7);
    }

    #[test]
    fn sync_then_load_round_trip() {
        let sb = SuperBlock::new(0, 1024, 32).unwrap();
        let disk = RamDisk::new(1024);
        let mut bitmap = SectorBitmap::new(&sb);

        let a = bitmap.alloc().unwrap();
        let b = bitmap.alloc().unwrap();
        bitmap.sync(&disk, a).unwrap();
        bitmap.sync(&disk, b).unwrap();

        let reloaded = SectorBitmap::load(&disk, &sb).unwrap();
        assert!(reloaded.is_used(a));
        assert!(reloaded.is_used(b));
        assert_eq!(reloaded.free_count(), bitmap.free_count());
    }
}
